//! Media fetch pass
//!
//! Downloads the hero images of posts and the images of products that have
//! no stored row yet. Media decoding is the least predictable part of the
//! harvest, so this pass always runs on an isolated pool: every worker has
//! its own thread and runtime.
//!
//! A fetched body is only stored if it decodes as an image; anything else
//! is recorded as an error for that id. Errored ids are not retried until
//! an operator clears them.

use crate::config::{Config, NetworkConfig};
use crate::crawler::dispatch::{drain, BatchSource, DrainReport};
use crate::fetcher::{FetchError, HttpClient};
use crate::model::{FrontierItem, MediaFilter, MediaKind};
use crate::pool::{Isolation, TaskHandler, WorkerPool};
use crate::storage::{open_storage, SharedStorage, SqliteStorage, Storage};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Checks that `bytes` hold a decodable image
pub fn validate_image(url: &str, bytes: &[u8]) -> std::result::Result<(), FetchError> {
    image::load_from_memory(bytes)
        .map(|_| ())
        .map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
}

/// Downloads one media locator and validates it
pub struct MediaFetcher {
    http: HttpClient,
    network: NetworkConfig,
}

impl MediaFetcher {
    pub fn new(network: &NetworkConfig) -> std::result::Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::from_config(network)?,
            network: network.clone(),
        })
    }
}

#[async_trait]
impl TaskHandler for MediaFetcher {
    type Task = FrontierItem;
    type Output = Vec<u8>;

    async fn handle(&mut self, task: &FrontierItem) -> std::result::Result<Vec<u8>, FetchError> {
        let bytes = self.http.get_bytes(&task.locator).await?;
        validate_image(&task.locator, &bytes)?;
        Ok(bytes)
    }

    /// A new client, so no connection from the discarded runtime is reused
    fn replacement(&self) -> Option<Self> {
        match Self::new(&self.network) {
            Ok(fetcher) => Some(fetcher),
            Err(e) => {
                tracing::warn!("Keeping media fetcher after panic: {}", e);
                None
            }
        }
    }
}

/// Options for one media pass
#[derive(Debug, Clone, Copy)]
pub struct MediaRun {
    pub kind: MediaKind,
    pub filter: MediaFilter,
    /// Clear previously recorded errors first so those ids are fetched again
    pub retry_errors: bool,
}

/// Drives the media pass for one media kind
pub struct MediaCoordinator {
    config: Arc<Config>,
    storage: SharedStorage,
}

impl MediaCoordinator {
    pub fn new(config: Config) -> Result<Self> {
        let storage = open_storage(&config.storage)?;
        Ok(Self::with_storage(config, storage))
    }

    pub fn with_storage(config: Config, storage: SqliteStorage) -> Self {
        Self {
            config: Arc::new(config),
            storage: SharedStorage::new(storage),
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub async fn run(&self, run: MediaRun, cancel: &CancellationToken) -> Result<DrainReport> {
        let handlers = (0..self.config.media.workers)
            .map(|_| MediaFetcher::new(&self.config.network))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.run_with(handlers, run, cancel).await
    }

    pub async fn run_with<H>(
        &self,
        handlers: Vec<H>,
        run: MediaRun,
        cancel: &CancellationToken,
    ) -> Result<DrainReport>
    where
        H: TaskHandler<Task = FrontierItem, Output = Vec<u8>>,
    {
        let kind = run.kind;

        if run.retry_errors {
            let cleared = self.storage.call(move |s| s.clear_media_errors(kind)).await?;
            tracing::info!("Cleared {} errored {} media rows", cleared, kind);
        }

        tracing::info!(
            "Starting {} media pass with {} isolated workers",
            kind,
            handlers.len()
        );

        let pool = WorkerPool::spawn(handlers, self.config.media.queue_capacity, Isolation::Isolated)?;
        let mut sink = MediaSink {
            storage: self.storage.clone(),
            kind,
            filter: run.filter,
        };

        drain(pool, &mut sink, self.config.media.batch_size, cancel).await
    }
}

struct MediaSink {
    storage: SharedStorage,
    kind: MediaKind,
    filter: MediaFilter,
}

#[async_trait]
impl BatchSource for MediaSink {
    type Output = Vec<u8>;

    async fn next_batch(&mut self, limit: usize) -> Result<Vec<FrontierItem>> {
        let (kind, filter) = (self.kind, self.filter);
        self.storage
            .call(move |s| s.list_missing_media(kind, limit, filter))
            .await
    }

    async fn persist_success(&mut self, item: &FrontierItem, output: Vec<u8>) -> Result<()> {
        let (kind, id) = (self.kind, item.id.clone());
        tracing::debug!("Stored {} media for {} ({} bytes)", kind, id, output.len());
        self.storage
            .call(move |s| s.insert_media(kind, &id, Ok(output.as_slice())))
            .await
    }

    async fn persist_failure(&mut self, item: &FrontierItem, error: &FetchError) -> Result<()> {
        let (kind, id, message) = (self.kind, item.id.clone(), error.to_string());
        self.storage
            .call(move |s| s.insert_media(kind, &id, Err(message.as_str())))
            .await
    }
}
