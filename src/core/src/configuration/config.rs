use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use super::types::*;
use crate::error_handling::types::ConfigError;

/// Environment variable naming the configuration file read by `StoreConfig::from_env`.
pub const CONFIG_ENV_VAR: &str = "SESSION_STORE_CONFIG";

/// Runtime configuration for the active-session store.
///
/// Loaded from a TOML file:
///
/// ```toml
/// mode = "server"
/// scratch_root = "/var/lib/sessions/active"
///
/// [database]
/// path = "/var/lib/sessions/store.sqlite3"
/// max_connections = 5
/// acquire_timeout_ms = 500
/// ```
///
/// Every field has a default, so an empty file is a valid desktop configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Selects the storage backend once for the whole process.
    pub mode: DeploymentMode,

    /// Parent of the per-session scratch directories (`session-<id>`).
    ///
    /// Used by the desktop backend for properties and by every backend for
    /// suspended-session data.
    pub scratch_root: PathBuf,

    /// Only consulted in `server` mode.
    pub database: DatabaseConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::default(),
            scratch_root: PathBuf::from("sessions/active"),
            database: DatabaseConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded store configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig =
            toml::from_str(text).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `SESSION_STORE_CONFIG`, or fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                info!("Using store configuration from {}: {}", CONFIG_ENV_VAR, path);
                Self::from_file(Path::new(&path))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scratch_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("scratch_root must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.database.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.acquire_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Scratch directory of one session.
    pub fn scratch_path(&self, session_id: &str) -> PathBuf {
        scratch_path_for(&self.scratch_root, session_id)
    }
}

pub(crate) fn scratch_path_for(root: &Path, session_id: &str) -> PathBuf {
    root.join(format!("session-{}", session_id))
}
