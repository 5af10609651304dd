//! Storage traits and error types
//!
//! This module defines the trait interface for the frontier store and
//! associated error types.

use crate::model::{FrontierItem, MediaFilter, MediaKind, Post, Product};
use crate::storage::MediaRecord;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database still busy after {attempts} attempts of {operation}")]
    ContentionExhausted { operation: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage handle poisoned by a panicked writer")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier store implementations
///
/// Every write is an idempotent upsert: re-applying identical input yields
/// an identical row. Implementations route each call through their retry
/// policy, so contention never surfaces from these methods unless a retry
/// cap was configured.
pub trait Storage {
    // ===== Frontier =====

    /// Records discovered items as pending. Existing rows keep their fields;
    /// only the locator is refreshed.
    fn enqueue(&mut self, items: &[FrontierItem]) -> StorageResult<()>;

    /// Returns up to `limit` items that have no visited record
    fn list_pending(&self, limit: usize) -> StorageResult<Vec<FrontierItem>>;

    /// Records the terminal outcome of an item. Re-marking overwrites the error.
    fn mark_visited(&mut self, id: &str, error: Option<&str>) -> StorageResult<()>;

    /// `None` if pending, `Some(error)` once visited
    fn visited_state(&self, id: &str) -> StorageResult<Option<Option<String>>>;

    // ===== Records =====

    fn upsert_posts(&mut self, posts: &[Post]) -> StorageResult<()>;

    fn upsert_products(&mut self, products: &[Product]) -> StorageResult<()>;

    /// Loads a fully fetched post; stubs are reported as `None`
    fn get_post(&self, id: &str) -> StorageResult<Option<Post>>;

    fn get_products(&self, ids: &[String]) -> StorageResult<Vec<Product>>;

    /// Profiles of stored posts with their post counts, fewest posts first
    fn profile_post_counts(&self) -> StorageResult<Vec<(String, u64)>>;

    // ===== Media =====

    /// Returns up to `limit` (id, media locator) pairs with no blob row of `kind`
    fn list_missing_media(
        &self,
        kind: MediaKind,
        limit: usize,
        filter: MediaFilter,
    ) -> StorageResult<Vec<FrontierItem>>;

    /// Stores the bytes or the error of a media fetch, never both
    fn insert_media(
        &mut self,
        kind: MediaKind,
        id: &str,
        outcome: Result<&[u8], &str>,
    ) -> StorageResult<()>;

    fn get_media(&self, kind: MediaKind, id: &str) -> StorageResult<Option<MediaRecord>>;

    /// Deletes errored rows of `kind` so the next media pass retries them
    fn clear_media_errors(&mut self, kind: MediaKind) -> StorageResult<usize>;

    // ===== Statistics =====

    fn count_posts(&self) -> StorageResult<u64>;

    fn count_visited(&self) -> StorageResult<u64>;

    fn count_visited_with_error(&self) -> StorageResult<u64>;

    /// Items with no visited record
    fn count_pending(&self) -> StorageResult<u64>;

    fn count_products(&self) -> StorageResult<u64>;

    /// (stored blobs, recorded errors) for a media kind
    fn count_media(&self, kind: MediaKind) -> StorageResult<(u64, u64)>;
}
