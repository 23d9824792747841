//! Database connection acquisition for the database storage backend.
//!
//! A `ConnectionProvider` either hands out connections from a shared pool
//! with a bounded wait, or lends out a single connection supplied by the
//! caller. In the second mode the store never closes the connection; its
//! lifetime belongs to whoever injected it.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Sqlite};
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use crate::configuration::types::DatabaseConfig;
use crate::error_handling::types::StorageError;

/// Acquisition timeout used when none is configured.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone)]
enum ConnectionSource {
    Pool(SqlitePool),
    Override(Arc<Mutex<SqliteConnection>>),
}

/// Shared handle on the database; clone it to give each session store access.
#[derive(Clone)]
pub struct ConnectionProvider {
    source: ConnectionSource,
    acquire_timeout: Duration,
    rt: Arc<Runtime>,
}

/// A connection borrowed for the duration of one storage call.
pub enum ConnectionLease<'a> {
    Pooled(PoolConnection<Sqlite>),
    Override(MutexGuard<'a, SqliteConnection>),
}

impl Deref for ConnectionLease<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            ConnectionLease::Pooled(conn) => &**conn,
            ConnectionLease::Override(guard) => &**guard,
        }
    }
}

impl DerefMut for ConnectionLease<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            ConnectionLease::Pooled(conn) => &mut **conn,
            ConnectionLease::Override(guard) => &mut **guard,
        }
    }
}

fn build_runtime() -> Result<Arc<Runtime>, StorageError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("session-store-db")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| {
            error!("Failed to build database runtime: {}", e);
            StorageError::ConnectionFailed {
                reason: format!("runtime unavailable: {}", e),
            }
        })
}

fn connect_failed(target: &str, e: sqlx::Error) -> StorageError {
    error!("Failed to open database {}: {}", target, e);
    StorageError::ConnectionFailed {
        reason: format!("unable to open {}: {}", target, e),
    }
}

impl ConnectionProvider {
    /// Open (creating if needed) a pooled SQLite database described by `config`.
    pub fn open_pool(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let rt = build_runtime()?;
        let path = config.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let timeout = config.acquire_timeout();
        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(timeout)
                .connect_with(opts)
                .await
        });
        let pool = pool.map_err(|e| connect_failed(&path.display().to_string(), e))?;
        info!(
            "Opened session database {} (max {} connection(s))",
            path.display(),
            config.max_connections
        );
        Ok(Self {
            rt,
            source: ConnectionSource::Pool(pool),
            acquire_timeout: timeout,
        })
    }

    /// Open a single private connection to `url` and use it as the override connection.
    /// Mostly useful with `sqlite::memory:` in tests.
    pub fn open_single(url: &str) -> Result<Self, StorageError> {
        let rt = build_runtime()?;
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| connect_failed(url, e))?
            .foreign_keys(true);
        let conn = rt
            .block_on(opts.connect())
            .map_err(|e| connect_failed(url, e))?;
        Ok(Self::with_connection(rt, Arc::new(Mutex::new(conn))))
    }

    /// Use an externally owned connection for every call.
    pub fn with_connection(rt: Arc<Runtime>, conn: Arc<Mutex<SqliteConnection>>) -> Self {
        Self {
            rt,
            source: ConnectionSource::Override(conn),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Drive `fut` to completion on the provider's runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Borrow a connection, waiting at most the acquisition timeout.
    pub async fn acquire(&self) -> Result<ConnectionLease<'_>, StorageError> {
        let timeout = self.acquire_timeout;
        match &self.source {
            ConnectionSource::Pool(pool) => {
                match tokio::time::timeout(timeout, pool.acquire()).await {
                    Ok(Ok(conn)) => Ok(ConnectionLease::Pooled(conn)),
                    Ok(Err(e)) => {
                        debug!("Pool refused connection: {}", e);
                        Err(StorageError::ConnectionFailed {
                            reason: format!("failed to acquire a connection: {}", e),
                        })
                    }
                    Err(_) => Err(StorageError::ConnectionFailed {
                        reason: format!(
                            "failed to acquire a connection in {} milliseconds",
                            timeout.as_millis()
                        ),
                    }),
                }
            }
            ConnectionSource::Override(conn) => {
                match tokio::time::timeout(timeout, conn.lock()).await {
                    Ok(guard) => Ok(ConnectionLease::Override(guard)),
                    Err(_) => Err(StorageError::ConnectionFailed {
                        reason: format!(
                            "override connection busy for {} milliseconds",
                            timeout.as_millis()
                        ),
                    }),
                }
            }
        }
    }
}
