use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    Invalid(String),
    /// The configured backend could not be opened.
    Backend(StorageError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {}", e),
            ConfigError::Backend(e) => write!(f, "Configured backend unavailable: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<StorageError> for ConfigError {
    fn from(err: StorageError) -> Self {
        ConfigError::Backend(err)
    }
}

/// Failures surfaced by an active-session storage backend.
///
/// `ConnectionFailed` means no connection could be acquired in time;
/// `DatabaseException` means the database rejected a statement.
#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed {
        reason: String,
    },
    DatabaseException {
        session_id: String,
        context: String,
        source: sqlx::Error,
    },
    SessionNotFound {
        session_id: String,
    },
    TooManySessionsReturned {
        session_id: String,
        count: usize,
    },
    EmptyPropertySet {
        session_id: String,
    },
    /// The name cannot be used as a property of this backend.
    InvalidPropertyName {
        name: String,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The operation does not exist in the active deployment mode.
    Unsupported {
        operation: String,
        mode: String,
    },
    /// Reported by the RPC peer or by the transport carrying the call.
    Remote {
        kind: String,
        message: String,
    },
    Serialization(serde_json::Error),
}

impl StorageError {
    /// Stable tag for the variant, used on the RPC wire.
    pub fn kind(&self) -> &str {
        match self {
            StorageError::ConnectionFailed { .. } => "connection_failed",
            StorageError::DatabaseException { .. } => "database_exception",
            StorageError::SessionNotFound { .. } => "session_not_found",
            StorageError::TooManySessionsReturned { .. } => "too_many_sessions_returned",
            StorageError::EmptyPropertySet { .. } => "empty_property_set",
            StorageError::InvalidPropertyName { .. } => "invalid_property_name",
            StorageError::Io { .. } => "io",
            StorageError::Unsupported { .. } => "unsupported",
            StorageError::Remote { kind, .. } => kind,
            StorageError::Serialization(_) => "serialization",
        }
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self, StorageError::SessionNotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed { reason } => {
                write!(f, "Storage connection failed: {}", reason)
            }
            StorageError::DatabaseException {
                session_id,
                context,
                source,
            } => write!(
                f,
                "Database exception while {} [ session: {} ]: {}",
                context, session_id, source
            ),
            StorageError::SessionNotFound { session_id } => {
                write!(f, "Session does not exist [ session: {} ]", session_id)
            }
            StorageError::TooManySessionsReturned { session_id, count } => write!(
                f,
                "Expected only one session returned, found {} [ session: {} ]",
                count, session_id
            ),
            StorageError::EmptyPropertySet { session_id } => {
                write!(f, "No properties supplied for write [ session: {} ]", session_id)
            }
            StorageError::InvalidPropertyName { name } => {
                write!(f, "Invalid property name: '{}'", name)
            }
            StorageError::Unsupported { operation, mode } => {
                write!(f, "Operation '{}' is not supported in {} mode", operation, mode)
            }
            StorageError::Io { path, source } => {
                write!(f, "Storage IO error at {}: {}", path.display(), source)
            }
            StorageError::Remote { kind, message } => {
                write!(f, "Remote storage error ({}): {}", kind, message)
            }
            StorageError::Serialization(e) => write!(f, "Storage serialization error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::DatabaseException { source, .. } => Some(source),
            StorageError::Io { source, .. } => Some(source),
            StorageError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err)
    }
}
