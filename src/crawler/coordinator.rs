//! Post crawl coordinator
//!
//! Drives the post frontier to completion: pending posts are fetched by a
//! shared-runtime worker pool and every outcome is written back to the
//! frontier store, which is what makes a run resumable.

use crate::config::Config;
use crate::crawler::dispatch::{drain, BatchSource, DrainReport};
use crate::fetcher::{FetchError, PostFetcher};
use crate::model::{FrontierItem, PostAggregate};
use crate::pool::{Isolation, TaskHandler, WorkerPool};
use crate::storage::{open_storage, SharedStorage, SqliteStorage, Storage};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
}

impl Coordinator {
    /// Opens the configured frontier store
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

    /// Adds share URLs to the frontier as ordinary pending items
    ///
    /// Already-visited posts stay visited.
    pub async fn seed(&self, locators: &[String]) -> Result<usize> {
        let items = locators
            .iter()
            .map(|locator| FrontierItem::from_locator(locator))
            .collect::<Result<Vec<_>>>()?;

        let count = items.len();
        self.storage.call(move |s| s.enqueue(&items)).await?;
        tracing::info!("Seeded {} items", count);
        Ok(count)
    }

    /// Crawls until no post is pending, using the configured fetch strategy
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DrainReport> {
        let handlers = PostFetcher::for_workers(&self.config, self.config.crawler.workers)?;
        self.run_with(handlers, cancel).await
    }

    /// Crawls with caller-supplied handlers, one per worker
    pub async fn run_with<H>(&self, handlers: Vec<H>, cancel: &CancellationToken) -> Result<DrainReport>
    where
        H: TaskHandler<Task = FrontierItem, Output = PostAggregate>,
    {
        let pending = self.storage.call(|s| s.count_pending()).await?;
        tracing::info!(
            "Starting crawl with {} workers, {} posts pending",
            handlers.len(),
            pending
        );

        let pool = WorkerPool::spawn(
            handlers,
            self.config.crawler.queue_capacity,
            Isolation::Shared,
        )?;
        let mut sink = PostSink {
            storage: self.storage.clone(),
        };

        drain(pool, &mut sink, self.config.crawler.batch_size, cancel).await
    }
}

/// Frontier-backed source of post fetches
pub(super) struct PostSink {
    pub(super) storage: SharedStorage,
}

#[async_trait]
impl BatchSource for PostSink {
    type Output = PostAggregate;

    async fn next_batch(&mut self, limit: usize) -> Result<Vec<FrontierItem>> {
        self.storage.call(move |s| s.list_pending(limit)).await
    }

    async fn persist_success(&mut self, item: &FrontierItem, output: PostAggregate) -> Result<()> {
        let id = item.id.clone();
        let (posts, products) = (output.posts.len(), output.products.len());

        // Records land before the visited mark, so a crash in between
        // leaves the item pending rather than visited without data.
        self.storage
            .call(move |s| {
                s.upsert_posts(&output.posts)?;
                s.upsert_products(&output.products)?;
                s.mark_visited(&id, None)
            })
            .await?;

        tracing::info!(
            "Fetched {}: {} posts, {} products",
            item.id,
            posts,
            products
        );
        Ok(())
    }

    async fn persist_failure(&mut self, item: &FrontierItem, error: &FetchError) -> Result<()> {
        let id = item.id.clone();
        let message = error.to_string();
        self.storage
            .call(move |s| s.mark_visited(&id, Some(&message)))
            .await
    }
}

/// Runs a complete crawl with the given seeds
pub async fn run_crawl(
    config: Config,
    seeds: &[String],
    cancel: &CancellationToken,
) -> Result<DrainReport> {
    let coordinator = Coordinator::new(config)?;
    if !seeds.is_empty() {
        coordinator.seed(seeds).await?;
    }
    coordinator.run(cancel).await
}
