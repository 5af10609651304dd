//! Post discovery by profile
//!
//! Every profile with stored posts is searched for its recent posts, the
//! profiles with the fewest known posts first. Ids not yet visited are
//! enqueued before they are fetched, so an interrupted pass leaves them
//! pending for the next crawl. The new posts of a profile are then fetched
//! together through the batched API and recorded exactly like crawled ones.

use crate::config::Config;
use crate::crawler::coordinator::PostSink;
use crate::crawler::dispatch::BatchSource;
use crate::fetcher::ApiFetcher;
use crate::model::FrontierItem;
use crate::storage::{open_storage, SharedStorage, SqliteStorage, Storage};
use crate::{HarvestError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Totals of one discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Profiles whose search succeeded
    pub profiles: usize,
    /// Unvisited post ids found and enqueued
    pub discovered: usize,
    /// Posts fetched and recorded
    pub fetched: usize,
    /// Failed searches, failed bulk fetches and failed posts
    pub errors: usize,
}

pub struct ProfileDiscovery {
    config: Arc<Config>,
    storage: SharedStorage,
    api: ApiFetcher,
}

impl ProfileDiscovery {
    pub fn new(config: Config) -> Result<Self> {
        let storage = open_storage(&config.storage)?;
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: Config, storage: SqliteStorage) -> Result<Self> {
        let api = ApiFetcher::new(&config.network, &config.crawler)?;
        Ok(Self {
            config: Arc::new(config),
            storage: SharedStorage::new(storage),
            api,
        })
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<DiscoveryReport> {
        let profiles = self.storage.call(|s| s.profile_post_counts()).await?;
        tracing::info!("Discovering posts for {} profiles", profiles.len());

        let mut report = DiscoveryReport::default();
        for (profile_id, known) in profiles {
            tracing::info!("Searching profile {} ({} known posts)", profile_id, known);
            self.discover_profile(&profile_id, &mut report, cancel).await?;
        }

        tracing::info!(
            "Discovery finished: {} profiles, {} new posts, {} fetched, {} errors",
            report.profiles,
            report.discovered,
            report.fetched,
            report.errors
        );
        Ok(report)
    }

    async fn discover_profile(
        &self,
        profile_id: &str,
        report: &mut DiscoveryReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let limit = self.config.crawler.profile_search_limit;
        let hits = match interruptible(cancel, self.api.search_profile(profile_id, limit)).await? {
            Ok(hits) => hits,
            Err(error) if error.is_fatal() => {
                return Err(HarvestError::FatalTransport {
                    id: profile_id.to_string(),
                    source: error,
                })
            }
            Err(error) => {
                tracing::warn!("Search for profile {} failed: {}", profile_id, error);
                report.errors += 1;
                return Ok(());
            }
        };
        report.profiles += 1;

        let found: Vec<FrontierItem> = hits
            .into_iter()
            .map(|hit| {
                let locator = hit
                    .share_url
                    .unwrap_or_else(|| self.api.post_locator(&hit.object_id));
                FrontierItem::new(hit.object_id, locator)
            })
            .collect();

        let mut fresh = self
            .storage
            .call(move |s| {
                let mut fresh = Vec::new();
                for item in found {
                    if s.visited_state(&item.id)?.is_none() {
                        fresh.push(item);
                    }
                }
                s.enqueue(&fresh)?;
                Ok(fresh)
            })
            .await?;

        if fresh.is_empty() {
            tracing::debug!("Profile {} has no new posts", profile_id);
            return Ok(());
        }
        fresh.sort_by(|a, b| a.id.cmp(&b.id));
        report.discovered += fresh.len();

        let ids: Vec<String> = fresh.iter().map(|item| item.id.clone()).collect();
        let outcomes = match interruptible(cancel, self.api.fetch_many(&ids)).await? {
            Ok(outcomes) => outcomes,
            Err(error) if error.is_fatal() => {
                return Err(HarvestError::FatalTransport {
                    id: profile_id.to_string(),
                    source: error,
                })
            }
            Err(error) => {
                tracing::warn!(
                    "Bulk fetch for profile {} failed, {} posts left pending: {}",
                    profile_id,
                    ids.len(),
                    error
                );
                report.errors += 1;
                return Ok(());
            }
        };

        let mut sink = PostSink {
            storage: self.storage.clone(),
        };
        for (item, outcome) in fresh.iter().zip(outcomes) {
            match outcome {
                Ok(aggregate) => {
                    sink.persist_success(item, aggregate).await?;
                    report.fetched += 1;
                }
                Err(error) => {
                    tracing::warn!("Failed to fetch {}: {}", item.id, error);
                    sink.persist_failure(item, &error).await?;
                    report.errors += 1;
                }
            }
        }

        Ok(())
    }
}

async fn interruptible<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(HarvestError::Interrupted),
        output = work => Ok(output),
    }
}
