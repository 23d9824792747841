pub mod configuration;
pub mod error_handling;
pub mod storage;

pub use error_handling::types::{ConfigError, StorageError};
pub use storage::factory::SessionStorageFactory;
pub use storage::storage_trait::ActiveSessionStorage;
pub use storage::types::{PropertyMap, SessionUser};
