use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::configuration::config::{scratch_path_for, StoreConfig};
use crate::configuration::types::DeploymentMode;
use crate::error_handling::types::{ConfigError, StorageError};
use crate::storage::connection::ConnectionProvider;
use crate::storage::database_storage::{initialize_schema, register_user, DatabaseStorage};
use crate::storage::file_storage::FileStorage;
use crate::storage::rpc_storage::{InvokeRpc, RpcStorage};
use crate::storage::storage_trait::ActiveSessionStorage;
use crate::storage::types::SessionUser;

enum Backend {
    File,
    Database(ConnectionProvider),
    Rpc(InvokeRpc),
}

/// Picks the storage backend once per process and opens per-session stores from it.
pub struct SessionStorageFactory {
    backend: Backend,
    scratch_root: PathBuf,
}

impl SessionStorageFactory {
    /// Build the factory for `config.mode`.
    ///
    /// `restricted` mode needs a transport to the peer and is rejected here;
    /// use `SessionStorageFactory::restricted` instead.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        match config.mode {
            DeploymentMode::Desktop => Ok(Self::desktop(&config.scratch_root)),
            DeploymentMode::Server => {
                let provider = ConnectionProvider::open_pool(&config.database)?;
                initialize_schema(&provider)?;
                Ok(Self::server(&config.scratch_root, provider))
            }
            DeploymentMode::Restricted => Err(ConfigError::Invalid(
                "restricted mode requires an RPC transport to the storage peer".into(),
            )),
        }
    }

    pub fn desktop<P: AsRef<Path>>(scratch_root: P) -> Self {
        info!("Session properties stored under {}", scratch_root.as_ref().display());
        Self {
            backend: Backend::File,
            scratch_root: scratch_root.as_ref().to_path_buf(),
        }
    }

    /// The schema is expected to exist already.
    pub fn server<P: AsRef<Path>>(scratch_root: P, provider: ConnectionProvider) -> Self {
        info!("Session properties stored in the session database");
        Self {
            backend: Backend::Database(provider),
            scratch_root: scratch_root.as_ref().to_path_buf(),
        }
    }

    pub fn restricted<P: AsRef<Path>>(scratch_root: P, invoke: InvokeRpc) -> Self {
        info!("Session properties forwarded to the storage peer");
        Self {
            backend: Backend::Rpc(invoke),
            scratch_root: scratch_root.as_ref().to_path_buf(),
        }
    }

    pub fn mode(&self) -> DeploymentMode {
        match self.backend {
            Backend::File => DeploymentMode::Desktop,
            Backend::Database(_) => DeploymentMode::Server,
            Backend::Rpc(_) => DeploymentMode::Restricted,
        }
    }

    /// Open the store for one session owned by `user`. Nothing is read or
    /// created until the first call on the returned store.
    pub fn open(&self, session_id: &str, user: &SessionUser) -> Box<dyn ActiveSessionStorage> {
        let scratch_path = scratch_path_for(&self.scratch_root, session_id);
        debug!("Opening {:?} storage for session {}", self.mode(), session_id);
        match &self.backend {
            Backend::File => Box::new(FileStorage::new(scratch_path)),
            Backend::Database(provider) => Box::new(DatabaseStorage::new(
                session_id,
                user.clone(),
                provider.clone(),
            )),
            Backend::Rpc(invoke) => Box::new(RpcStorage::new(
                user.clone(),
                session_id,
                scratch_path,
                invoke.clone(),
            )),
        }
    }

    /// Register `user` as a session owner. Only the database backend keeps owners.
    pub fn register_user(&self, user: &SessionUser) -> Result<i64, StorageError> {
        match &self.backend {
            Backend::Database(provider) => register_user(provider, user),
            _ => Err(StorageError::Unsupported {
                operation: "register_user".into(),
                mode: format!("{:?}", self.mode()).to_lowercase(),
            }),
        }
    }
}
