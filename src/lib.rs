//! ltk-harvest: a resumable post and media harvester
//!
//! This crate discovers posts and their attached products from a content
//! platform, records them in a durable SQLite frontier, and fetches the
//! referenced media in a separate, isolated pass. Every run can be stopped
//! and restarted; the frontier remembers what has already been processed.

pub mod config;
pub mod crawler;
pub mod fetcher;
pub mod media;
pub mod model;
pub mod output;
pub mod pool;
pub mod storage;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetcher::FetchError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Fatal transport error while fetching {id}: {source}")]
    FatalTransport {
        id: String,
        source: fetcher::FetchError,
    },

    #[error("Run interrupted")]
    Interrupted,

    #[error("Batch incomplete: dispatched {dispatched}, received {received}")]
    BatchIncomplete { dispatched: usize, received: usize },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{FrontierItem, MediaFilter, MediaKind, Post, PostAggregate, Product, ProductDetails};
