//! Fixed-size worker pool
//!
//! Workers pull tasks from one bounded queue and push every outcome, success
//! or classified failure, onto an unbounded completion channel. Because the
//! completion side never blocks, a full task queue can always drain.
//!
//! Two isolation strategies are available:
//! - [`Isolation::Shared`]: workers are tasks on the caller's runtime
//! - [`Isolation::Isolated`]: each worker runs on its own OS thread with a
//!   private runtime, so a misbehaving handler cannot stall its siblings
//!
//! Each worker owns one handler at a time. A handler that panics is reported
//! as a failed completion for the task it was running and then replaced via
//! [`TaskHandler::replacement`]; isolated workers also discard their runtime,
//! so nothing the panicked handler spawned survives into the next task.

use crate::fetcher::FetchError;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Work performed by one pool worker
#[async_trait]
pub trait TaskHandler: Send + 'static {
    type Task: Send + Sync + 'static;
    type Output: Send + 'static;

    async fn handle(&mut self, task: &Self::Task) -> Result<Self::Output, FetchError>;

    /// A fresh handler to take over after this one panicked
    ///
    /// `None` keeps the current handler.
    fn replacement(&self) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("Worker pool is closed")]
    Closed,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Shared,
    Isolated,
}

/// Message on the task queue
pub enum WorkerMessage<T> {
    Task(T),
    /// Consumed by exactly one worker, which then exits
    Shutdown,
}

/// A finished task and its outcome
#[derive(Debug)]
pub struct Completion<T, R> {
    pub task: T,
    pub outcome: Result<R, FetchError>,
}

type TaskQueue<T> = Arc<Mutex<mpsc::Receiver<WorkerMessage<T>>>>;

enum WorkerHandle {
    Task(JoinHandle<()>),
    Thread {
        thread: std::thread::JoinHandle<()>,
        exited: oneshot::Receiver<()>,
    },
}

/// A fixed set of workers driven through a bounded task queue
pub struct WorkerPool<H: TaskHandler> {
    tasks: mpsc::Sender<WorkerMessage<H::Task>>,
    completions: mpsc::UnboundedReceiver<Completion<H::Task, H::Output>>,
    workers: Vec<WorkerHandle>,
    cancel: CancellationToken,
}

impl<H: TaskHandler> WorkerPool<H> {
    /// Starts one worker per handler
    ///
    /// Shared workers are spawned onto the current tokio runtime, so this
    /// must be called from within one.
    pub fn spawn(
        handlers: Vec<H>,
        queue_capacity: usize,
        isolation: Isolation,
    ) -> Result<Self, PoolError> {
        if handlers.is_empty() {
            return Err(PoolError::NoWorkers);
        }

        let (task_tx, task_rx) = mpsc::channel(queue_capacity.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let queue: TaskQueue<H::Task> = Arc::new(Mutex::new(task_rx));
        let cancel = CancellationToken::new();

        let mut pool = Self {
            tasks: task_tx,
            completions: completion_rx,
            workers: Vec::with_capacity(handlers.len()),
            cancel,
        };

        for (index, handler) in handlers.into_iter().enumerate() {
            let queue = Arc::clone(&queue);
            let completions = completion_tx.clone();
            let cancel = pool.cancel.clone();

            let handle = match isolation {
                Isolation::Shared => WorkerHandle::Task(tokio::spawn(async move {
                    let mut handler = handler;
                    while worker_loop(index, &mut handler, &queue, &completions, &cancel).await
                        == WorkerExit::Panicked
                    {
                        replace_handler(index, &mut handler);
                    }
                })),
                Isolation::Isolated => {
                    let (exit_tx, exit_rx) = oneshot::channel();
                    let thread = std::thread::Builder::new()
                        .name(format!("pool-worker-{}", index))
                        .spawn(move || {
                            isolated_worker(index, handler, queue, completions, cancel);
                            let _ = exit_tx.send(());
                        })?;
                    WorkerHandle::Thread {
                        thread,
                        exited: exit_rx,
                    }
                }
            };
            pool.workers.push(handle);
        }

        tracing::debug!("Started {} workers ({:?})", pool.workers.len(), isolation);
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a task, waiting while the queue is full
    pub async fn submit(&self, task: H::Task) -> Result<(), PoolError> {
        self.tasks
            .send(WorkerMessage::Task(task))
            .await
            .map_err(|_| PoolError::Closed)
    }

    /// Next finished task, or `None` once every worker has exited
    pub async fn next_completion(&mut self) -> Option<Completion<H::Task, H::Output>> {
        self.completions.recv().await
    }

    /// Graceful stop: one shutdown message per worker, then wait for each
    /// worker to acknowledge by exiting
    pub async fn shutdown(mut self) {
        let workers = std::mem::take(&mut self.workers);

        for _ in 0..workers.len() {
            if self.tasks.send(WorkerMessage::Shutdown).await.is_err() {
                break;
            }
        }

        for (index, worker) in workers.into_iter().enumerate() {
            match worker {
                WorkerHandle::Task(handle) => {
                    if let Err(e) = handle.await {
                        tracing::warn!("Worker {} ended abnormally: {}", index, e);
                    }
                }
                WorkerHandle::Thread { thread, exited } => {
                    if exited.await.is_err() {
                        tracing::warn!("Worker {} thread exited without acknowledging", index);
                    }
                    match tokio::task::spawn_blocking(move || thread.join()).await {
                        Ok(Ok(())) => {}
                        _ => tracing::warn!("Worker {} thread panicked", index),
                    }
                }
            }
        }

        tracing::debug!("Worker pool shut down");
    }

    /// Immediate stop: in-flight work is dropped and results are discarded
    pub fn abort(mut self) {
        self.cancel.cancel();
        for worker in std::mem::take(&mut self.workers) {
            if let WorkerHandle::Task(handle) = worker {
                handle.abort();
            }
        }
        tracing::debug!("Worker pool aborted");
    }
}

impl<H: TaskHandler> Drop for WorkerPool<H> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_message<T>(queue: &Mutex<mpsc::Receiver<WorkerMessage<T>>>) -> Option<WorkerMessage<T>> {
    queue.lock().await.recv().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// Shutdown, cancellation, or the pool went away
    Stopped,
    /// The handler panicked; its task was already reported as failed
    Panicked,
}

/// Runs an isolated worker on a private runtime, rebuilt after every panic
fn isolated_worker<H: TaskHandler>(
    index: usize,
    mut handler: H,
    queue: TaskQueue<H::Task>,
    completions: mpsc::UnboundedSender<Completion<H::Task, H::Output>>,
    cancel: CancellationToken,
) {
    loop {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Worker {} failed to start runtime: {}", index, e);
                return;
            }
        };

        let exit = runtime.block_on(worker_loop(index, &mut handler, &queue, &completions, &cancel));
        drop(runtime);

        match exit {
            WorkerExit::Stopped => return,
            WorkerExit::Panicked => replace_handler(index, &mut handler),
        }
    }
}

fn replace_handler<H: TaskHandler>(index: usize, handler: &mut H) {
    match handler.replacement() {
        Some(fresh) => {
            *handler = fresh;
            tracing::warn!("Worker {} restarted with a fresh handler", index);
        }
        None => tracing::warn!("Worker {} restarted", index),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn worker_loop<H: TaskHandler>(
    index: usize,
    handler: &mut H,
    queue: &TaskQueue<H::Task>,
    completions: &mpsc::UnboundedSender<Completion<H::Task, H::Output>>,
    cancel: &CancellationToken,
) -> WorkerExit {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = next_message(queue) => message,
        };

        let task = match message {
            Some(WorkerMessage::Task(task)) => task,
            Some(WorkerMessage::Shutdown) | None => break,
        };

        let caught = tokio::select! {
            _ = cancel.cancelled() => break,
            caught = AssertUnwindSafe(handler.handle(&task)).catch_unwind() => caught,
        };

        let (outcome, exit) = match caught {
            Ok(outcome) => (outcome, None),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Worker {} panicked while handling a task: {}", index, message);
                (
                    Err(FetchError::WorkerPanicked { message }),
                    Some(WorkerExit::Panicked),
                )
            }
        };

        if completions.send(Completion { task, outcome }).is_err() {
            break;
        }
        if let Some(exit) = exit {
            return exit;
        }
    }

    tracing::trace!("Worker {} stopped", index);
    WorkerExit::Stopped
}
