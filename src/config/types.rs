use serde::Deserialize;

/// Main configuration structure for ltk-harvest
///
/// Every section and key is optional; missing values fall back to the
/// defaults below so a harvest can run with no config file at all.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub crawler: CrawlerConfig,
    pub media: MediaConfig,
}

/// Frontier store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Upper bound of the random sleep between contention retries (milliseconds)
    #[serde(rename = "retry-max-backoff-ms")]
    pub retry_max_backoff_ms: u64,

    /// Optional cap on contention retries; unset means retry forever
    #[serde(rename = "retry-max-attempts")]
    pub retry_max_attempts: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "db.db".to_string(),
            retry_max_backoff_ms: 1000,
            retry_max_attempts: None,
        }
    }
}

/// Settings shared by every HTTP client the harvester builds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Proxy applied uniformly to every fetcher
    pub proxy: Option<String>,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Connect timeout (milliseconds)
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            user_agent: format!("ltk-harvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Which fetch strategy drives the post crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Load the post page and read its embedded application state
    Page,
    /// Query the structured API in id batches
    Api,
}

/// Post crawl configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of concurrent fetchers
    pub workers: usize,

    /// Pending items pulled from the frontier per cycle
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Capacity of the bounded task queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    pub fetcher: FetcherKind,

    /// Base URL of the structured API
    #[serde(rename = "api-base")]
    pub api_base: String,

    /// Ids per API request (capped at 50)
    #[serde(rename = "api-batch-size")]
    pub api_batch_size: usize,

    /// How long to keep polling a page for its application state (milliseconds)
    #[serde(rename = "hydration-timeout-ms")]
    pub hydration_timeout_ms: u64,

    #[serde(rename = "hydration-poll-ms")]
    pub hydration_poll_ms: u64,

    /// Recent posts requested per profile during discovery
    #[serde(rename = "profile-search-limit")]
    pub profile_search_limit: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 50,
            queue_capacity: 8,
            fetcher: FetcherKind::Page,
            api_base: "https://api-gateway.rewardstyle.com/api/ltk/v2".to_string(),
            api_batch_size: 50,
            hydration_timeout_ms: 10_000,
            hydration_poll_ms: 500,
            profile_search_limit: 50,
        }
    }
}

/// Media pass configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub workers: usize,

    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Only fetch product images whose product has a price
    #[serde(rename = "only-with-price")]
    pub only_with_price: bool,

    /// Fetch media of the most recently fetched records first
    #[serde(rename = "most-recent-first")]
    pub most_recent_first: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 50,
            queue_capacity: 16,
            only_with_price: false,
            most_recent_first: false,
        }
    }
}
