//! Storage module for the durable frontier
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Pending/visited frontier bookkeeping
//! - Post, product, and media blob persistence
//! - Retrying writes that hit lock contention

mod retry;
mod schema;
mod sqlite;
mod traits;

pub use retry::{is_contention, Backoff, RetryPolicy};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::StorageConfig;
use crate::HarvestError;

use std::path::Path;
use std::sync::{Arc, Mutex};

/// Opens the storage database described by the config
pub fn open_storage(config: &StorageConfig) -> Result<SqliteStorage, HarvestError> {
    let policy = RetryPolicy::from_config(config);
    Ok(SqliteStorage::open(Path::new(&config.database_path), policy)?)
}

/// Storage handle usable from async code
///
/// Calls run on the blocking thread pool, so a retry sleep never stalls the
/// async runtime.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<Mutex<SqliteStorage>>,
}

impl SharedStorage {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    pub async fn call<T, F>(&self, operation: F) -> Result<T, HarvestError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStorage) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || {
            let mut storage = inner.lock().map_err(|_| StorageError::Poisoned)?;
            operation(&mut *storage)
        })
        .await?;
        Ok(result?)
    }
}

/// A stored media row: bytes or an error, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRecord {
    Blob(Vec<u8>),
    Error(String),
}

impl MediaRecord {
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob(_))
    }
}
