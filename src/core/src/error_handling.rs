//! Error types shared by the storage backends and the configuration layer.

pub mod types;

pub use types::{ConfigError, StorageError};
