//! Batch dispatch loop
//!
//! The loop cycles through four phases until the source runs dry:
//!
//! 1. ask the source for the next batch (an empty batch means drained)
//! 2. submit every item of the batch to the pool
//! 3. collect exactly one completion per submitted item
//! 4. persist each completion as it arrives
//!
//! The next batch is only requested once every completion of the current
//! one has been persisted, so an item can never be dispatched twice in a
//! run. A fatal fetch error or a cancellation aborts the pool at once;
//! whatever was not persisted stays pending for the next run.

use crate::fetcher::{ErrorClass, FetchError};
use crate::model::FrontierItem;
use crate::pool::{TaskHandler, WorkerPool};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where the dispatch loop gets its work from and records outcomes to
#[async_trait]
pub trait BatchSource: Send {
    type Output: Send + 'static;

    /// Up to `limit` items still awaiting an outcome
    async fn next_batch(&mut self, limit: usize) -> Result<Vec<FrontierItem>>;

    async fn persist_success(&mut self, item: &FrontierItem, output: Self::Output) -> Result<()>;

    async fn persist_failure(&mut self, item: &FrontierItem, error: &FetchError) -> Result<()>;
}

/// Counters for one drained run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: usize,
    pub dispatched: usize,
    pub persisted: usize,
    /// Completions recorded with a recoverable error
    pub errors: usize,
}

/// Runs the dispatch loop until `source` has no more work
///
/// On success the pool is shut down gracefully; on any error it is aborted.
pub async fn drain<H, S>(
    mut pool: WorkerPool<H>,
    source: &mut S,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<DrainReport>
where
    H: TaskHandler<Task = FrontierItem>,
    S: BatchSource<Output = H::Output>,
{
    match run_cycles(&mut pool, source, batch_size.max(1), cancel).await {
        Ok(report) => {
            pool.shutdown().await;
            Ok(report)
        }
        Err(e) => {
            pool.abort();
            Err(e)
        }
    }
}

async fn run_cycles<H, S>(
    pool: &mut WorkerPool<H>,
    source: &mut S,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<DrainReport>
where
    H: TaskHandler<Task = FrontierItem>,
    S: BatchSource<Output = H::Output>,
{
    let mut report = DrainReport::default();
    let started = Instant::now();

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Err(HarvestError::Interrupted),
            batch = source.next_batch(batch_size) => batch?,
        };

        if batch.is_empty() {
            tracing::info!(
                "Frontier drained: {} items in {} batches ({} errors) in {:.1}s",
                report.persisted,
                report.batches,
                report.errors,
                started.elapsed().as_secs_f64()
            );
            return Ok(report);
        }

        let dispatched = batch.len();
        report.batches += 1;
        tracing::debug!("Dispatching batch {} of {} items", report.batches, dispatched);

        for item in batch {
            tokio::select! {
                _ = cancel.cancelled() => return Err(HarvestError::Interrupted),
                submitted = pool.submit(item) => submitted?,
            }
        }
        report.dispatched += dispatched;

        let mut received = 0;
        while received < dispatched {
            let completion = tokio::select! {
                _ = cancel.cancelled() => return Err(HarvestError::Interrupted),
                completion = pool.next_completion() => completion,
            };

            let Some(completion) = completion else {
                return Err(HarvestError::BatchIncomplete {
                    dispatched,
                    received,
                });
            };
            received += 1;

            match completion.outcome {
                Ok(output) => source.persist_success(&completion.task, output).await?,
                Err(error) if error.class() == ErrorClass::Fatal => {
                    tracing::error!("Fatal error fetching {}: {}", completion.task.id, error);
                    return Err(HarvestError::FatalTransport {
                        id: completion.task.id,
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::warn!("Failed to fetch {}: {}", completion.task.id, error);
                    report.errors += 1;
                    source.persist_failure(&completion.task, &error).await?;
                }
            }
            report.persisted += 1;
        }

        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(
            "Progress: {} items persisted, {} errors, {:.2} items/sec",
            report.persisted,
            report.errors,
            report.persisted as f64 / elapsed.max(f64::EPSILON)
        );
    }
}
