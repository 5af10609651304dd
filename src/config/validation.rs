use crate::config::types::{Config, CrawlerConfig, MediaConfig, NetworkConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Ids the structured API accepts in a single request
pub const MAX_API_BATCH: usize = 50;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_storage_config(&config.storage)?;
    validate_network_config(&config.network)?;
    validate_crawler_config(&config.crawler)?;
    validate_media_config(&config.media)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.retry_max_backoff_ms == 0 {
        return Err(ConfigError::Validation(
            "retry_max_backoff_ms must be >= 1".to_string(),
        ));
    }

    if config.retry_max_attempts == Some(0) {
        return Err(ConfigError::Validation(
            "retry_max_attempts must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_network_config(config: &NetworkConfig) -> Result<(), ConfigError> {
    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    if config.request_timeout_ms == 0 || config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be >= 1ms".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates post crawl configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_pool_shape("crawler", config.workers, config.batch_size, config.queue_capacity)?;

    Url::parse(&config.api_base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_base: {}", e)))?;

    if config.api_batch_size < 1 || config.api_batch_size > MAX_API_BATCH {
        return Err(ConfigError::Validation(format!(
            "api_batch_size must be between 1 and {}, got {}",
            MAX_API_BATCH, config.api_batch_size
        )));
    }

    if config.hydration_poll_ms == 0 || config.hydration_poll_ms > config.hydration_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "hydration_poll_ms must be between 1 and hydration_timeout_ms ({}), got {}",
            config.hydration_timeout_ms, config.hydration_poll_ms
        )));
    }

    if config.profile_search_limit == 0 {
        return Err(ConfigError::Validation(
            "profile_search_limit must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_media_config(config: &MediaConfig) -> Result<(), ConfigError> {
    validate_pool_shape("media", config.workers, config.batch_size, config.queue_capacity)
}

fn validate_pool_shape(
    section: &str,
    workers: usize,
    batch_size: usize,
    queue_capacity: usize,
) -> Result<(), ConfigError> {
    if workers < 1 || workers > 256 {
        return Err(ConfigError::Validation(format!(
            "{}.workers must be between 1 and 256, got {}",
            section, workers
        )));
    }

    if batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.batch_size must be >= 1, got {}",
            section, batch_size
        )));
    }

    if queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.queue_capacity must be >= 1, got {}",
            section, queue_capacity
        )));
    }

    Ok(())
}
