use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which backend a deployment stores session properties in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// One scratch directory per session on the local filesystem.
    #[default]
    Desktop,
    /// Rows in the shared session database.
    Server,
    /// Forwarded to a trusted peer process.
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sessions.sqlite3"),
            max_connections: 5,
            acquire_timeout_ms: 500,
        }
    }
}
