use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error_handling::types::StorageError;
use crate::storage::property_names::PropertyNameMapper;
use crate::storage::storage_trait::{is_valid_lenient, is_valid_strict, ActiveSessionStorage};
use crate::storage::types::PropertyMap;

/// Subdirectory of the scratch path holding one file per property.
pub const PROPERTIES_DIR: &str = "properties";

/// Subdirectory of the scratch path holding suspended session state.
pub const SUSPENDED_DATA_DIR: &str = "suspended-session-data";

/// Total size in bytes of the suspended-session data below `scratch_path`.
///
/// Entries that vanish or cannot be inspected while walking count as zero.
pub(crate) fn suspended_data_size(scratch_path: &Path) -> u64 {
    let dir = scratch_path.join(SUSPENDED_DATA_DIR);
    if !dir.exists() {
        return 0;
    }
    WalkDir::new(&dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("Skipping unreadable suspended data entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Session properties kept as files in the session's scratch directory.
///
/// Layout (the scratch path has the session id baked in):
///
/// ```text
/// <scratch_root>/session-6d0bdd18/
///     properties/editor
///     properties/last-used
///     suspended-session-data/...
/// ```
pub struct FileStorage {
    scratch_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(scratch_path: P) -> Self {
        Self {
            scratch_path: scratch_path.as_ref().to_path_buf(),
        }
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    fn property_dir(&self) -> PathBuf {
        self.scratch_path.join(PROPERTIES_DIR)
    }

    /// Path of the file holding `name`. The file name must stay a single
    /// component inside the properties directory.
    fn property_file(&self, name: &str) -> Result<PathBuf, StorageError> {
        let file_name = PropertyNameMapper::FILE.to_backend(name);
        if !is_plain_file_name(file_name) {
            warn!("Rejecting property name {:?} for {}", name, self.session_label());
            return Err(StorageError::InvalidPropertyName {
                name: name.to_string(),
            });
        }
        Ok(self.property_dir().join(file_name))
    }

    /// Name used in errors: the scratch directory name, e.g. `session-6d0bdd18`.
    fn session_label(&self) -> String {
        self.scratch_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.scratch_path.display().to_string())
    }

    fn not_found(&self) -> StorageError {
        StorageError::SessionNotFound {
            session_id: self.session_label(),
        }
    }

    fn ensure_property_dir(&self) -> Result<PathBuf, StorageError> {
        let dir = self.property_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create properties dir {}: {}", dir.display(), e);
            StorageError::io(&dir, e)
        })?;
        Ok(dir)
    }

    fn read_file(&self, path: &Path) -> Result<String, StorageError> {
        match fs::read_to_string(path) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => {
                error!("Failed to read property file {}: {}", path.display(), e);
                Err(StorageError::io(path, e))
            }
        }
    }

    fn require_session(&self) -> Result<(), StorageError> {
        if self.property_dir().is_dir() {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }
}

impl ActiveSessionStorage for FileStorage {
    fn read_property(&self, name: &str) -> Result<String, StorageError> {
        let path = self.property_file(name)?;
        self.require_session()?;
        self.read_file(&path)
    }

    fn read_properties(&self, names: &[&str]) -> Result<PropertyMap, StorageError> {
        let paths = names
            .iter()
            .map(|name| self.property_file(name))
            .collect::<Result<Vec<_>, _>>()?;
        self.require_session()?;
        let mut values = PropertyMap::new();
        for (name, path) in names.iter().zip(&paths) {
            values.insert(name.to_string(), self.read_file(path)?);
        }
        Ok(values)
    }

    fn read_all_properties(&self) -> Result<PropertyMap, StorageError> {
        self.require_session()?;
        let dir = self.property_dir();
        let entries = fs::read_dir(&dir).map_err(|e| {
            error!("Failed to read properties dir {}: {}", dir.display(), e);
            StorageError::io(&dir, e)
        })?;

        let mut values = PropertyMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Ignoring property file with non UTF-8 name: {}", path.display());
                continue;
            };
            let name = PropertyNameMapper::FILE.to_property(file_name).to_string();
            match fs::read_to_string(&path) {
                Ok(value) => {
                    values.insert(name, value);
                }
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    error!("Failed to read property file {}: {}", path.display(), e);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to read property file {}: {}", path.display(), e);
                    return Err(StorageError::io(&path, e));
                }
            }
        }
        debug!("Loaded {} propert(ies) from {}", values.len(), dir.display());
        Ok(values)
    }

    fn write_properties(&self, properties: &PropertyMap) -> Result<(), StorageError> {
        if properties.is_empty() {
            return Err(StorageError::EmptyPropertySet {
                session_id: self.session_label(),
            });
        }
        let paths = properties
            .keys()
            .map(|name| self.property_file(name))
            .collect::<Result<Vec<_>, _>>()?;
        self.ensure_property_dir()?;
        for (path, value) in paths.iter().zip(properties.values()) {
            fs::write(&path, value).map_err(|e| {
                error!("Failed to write property file {}: {}", path.display(), e);
                StorageError::io(path, e)
            })?;
        }
        debug!(
            "Wrote {} propert(ies) to {}",
            properties.len(),
            self.property_dir().display()
        );
        Ok(())
    }

    fn destroy(&self) -> Result<(), StorageError> {
        match fs::remove_dir_all(&self.scratch_path) {
            Ok(()) => {
                info!("Removed session scratch path {}", self.scratch_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "No scratch path to remove at {}",
                    self.scratch_path.display()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to remove scratch path {}: {}",
                    self.scratch_path.display(),
                    e
                );
                Err(StorageError::io(&self.scratch_path, e))
            }
        }
    }

    fn clear_scratch_path(&self) -> Result<(), StorageError> {
        let dir = self.scratch_path.join(SUSPENDED_DATA_DIR);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Cleared suspended data at {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(!self.property_dir().exists())
    }

    fn is_valid(&self) -> Result<bool, StorageError> {
        is_valid_lenient(self)
    }

    fn validate(&self) -> Result<bool, StorageError> {
        is_valid_strict(self)
    }

    fn compute_suspend_size(&self) -> u64 {
        suspended_data_size(&self.scratch_path)
    }
}
