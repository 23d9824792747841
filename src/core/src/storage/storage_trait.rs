//! Active Session Storage Trait
//!
//! This module defines the `ActiveSessionStorage` trait, the contract shared by
//! every backend that persists the properties of one active session.
//!
//! Implementors are responsible for:
//! - Reading and writing named string properties
//! - Creating the session record on first write (update, else insert)
//! - Removing the record on `destroy`
//! - Reporting whether the record exists and whether it is usable
//!
//! An instance is bound to a single session id at construction time.

use log::debug;

use crate::error_handling::types::StorageError;
use crate::storage::types::{property, PropertyMap, PRIMARY_EDITOR};

pub trait ActiveSessionStorage: Send + Sync {
    /// Read one property. Returns an empty string when the session exists but
    /// the property was never set, and `SessionNotFound` when it does not exist.
    fn read_property(&self, name: &str) -> Result<String, StorageError>;

    /// Read the named properties, keyed by the names requested.
    fn read_properties(&self, names: &[&str]) -> Result<PropertyMap, StorageError>;

    /// Read every property the backend holds for this session, including any
    /// backend-specific extras.
    fn read_all_properties(&self) -> Result<PropertyMap, StorageError>;

    fn write_property(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut properties = PropertyMap::new();
        properties.insert(name.to_string(), value.to_string());
        self.write_properties(&properties)
    }

    /// Update the session with `properties`, creating it if it does not exist.
    fn write_properties(&self, properties: &PropertyMap) -> Result<(), StorageError>;

    /// Remove the session. Removing an absent session succeeds.
    fn destroy(&self) -> Result<(), StorageError>;

    /// Remove suspended-session data kept next to the session, if any.
    fn clear_scratch_path(&self) -> Result<(), StorageError>;

    /// True when no record exists for the session.
    fn is_empty(&self) -> Result<bool, StorageError>;

    /// True when the record exists and carries the metadata its editor kind requires.
    ///
    /// Only a failure to determine emptiness is returned as an error; failures
    /// reading the metadata itself read as `false`. Use `validate` to see them.
    fn is_valid(&self) -> Result<bool, StorageError> {
        Ok(!self.is_empty()?)
    }

    /// Same predicate as `is_valid`, but every read failure is returned.
    fn validate(&self) -> Result<bool, StorageError> {
        self.is_valid()
    }

    /// Bytes of suspended-session data held for this session.
    fn compute_suspend_size(&self) -> u64 {
        0
    }
}

pub fn is_primary_editor(editor: &str) -> bool {
    editor.is_empty() || editor == PRIMARY_EDITOR
}

/// Check the metadata an existing session needs for its editor kind.
///
/// Sessions of the primary editor kind need a project; any other editor is
/// usable as soon as the record exists.
pub(crate) fn metadata_complete<S>(storage: &S) -> Result<bool, StorageError>
where
    S: ActiveSessionStorage + ?Sized,
{
    let editor = storage.read_property(property::EDITOR)?;
    if !is_primary_editor(&editor) {
        return Ok(true);
    }
    let project = storage.read_property(property::PROJECT)?;
    Ok(!project.is_empty())
}

/// `is_valid` for backends that can inspect metadata locally.
pub(crate) fn is_valid_lenient<S>(storage: &S) -> Result<bool, StorageError>
where
    S: ActiveSessionStorage + ?Sized,
{
    if storage.is_empty()? {
        return Ok(false);
    }
    match metadata_complete(storage) {
        Ok(valid) => Ok(valid),
        Err(e) => {
            debug!("Treating session as invalid, metadata unreadable: {}", e);
            Ok(false)
        }
    }
}

/// `validate` for backends that can inspect metadata locally.
pub(crate) fn is_valid_strict<S>(storage: &S) -> Result<bool, StorageError>
where
    S: ActiveSessionStorage + ?Sized,
{
    if storage.is_empty()? {
        return Ok(false);
    }
    metadata_complete(storage)
}
