//! Configuration module for ltk-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Command-line flags are layered on top of the loaded values by the binary.
//!
//! # Example
//!
//! ```no_run
//! use ltk_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawl workers: {}", config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, FetcherKind, MediaConfig, NetworkConfig, StorageConfig};

// Re-export parser functions
pub use parser::{config_digest, load_config, load_config_with_hash};
pub use validation::validate;
