//! Storage subsystem
//!
//! This module provides the backends that persist the properties of active
//! sessions, and the factory that picks one of them per deployment.
//!
//! Components:
//! - `storage_trait`: the ActiveSessionStorage trait defining a uniform API.
//! - `types`: property names, property maps and the owning user.
//! - `property_names`: fixed property-to-column and property-to-file renames.
//! - `timestamps`: normalization of timestamp properties before storage.
//! - `connection`: pooled or injected SQLite connections with a bounded wait.
//! - `database_storage`: SQLite implementation using sqlx, one row per session.
//! - `file_storage`: filesystem-backed implementation, one file per property.
//! - `rpc_storage`: proxy forwarding every call to a trusted peer process.
//! - `factory`: selects the backend from the deployment mode.

pub mod connection;
pub mod database_storage;
pub mod factory;
pub mod file_storage;
pub mod property_names;
pub mod rpc_storage;
pub mod storage_trait;
pub mod timestamps;
pub mod types;

#[cfg(test)]
mod contract_tests;
