//! Harvest settings from a TOML file
//!
//! A run is identified in its logs by the digest of the exact file text it
//! was started with. The text is read once, so the digest always describes
//! the settings that were parsed.

use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates a harvest config file
///
/// ```no_run
/// use std::path::Path;
/// use ltk_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Database: {}", config.storage.database_path);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Hex SHA-256 of raw config text
pub fn config_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Loads a config file and returns it with the digest of its text
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;

    tracing::debug!(
        "Parsed {}: {} crawl workers ({:?}), {} media workers, database {}",
        path.display(),
        config.crawler.workers,
        config.crawler.fetcher,
        config.media.workers,
        config.storage.database_path
    );

    Ok((config, config_digest(&content)))
}
