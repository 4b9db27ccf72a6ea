//! Bounded worker pool.
//!
//! Workers are long-lived tokio tasks, each owning one `FileProcessor`.
//! The pool creates them up front with an optional delay between
//! creations, tolerates partial startup down to half of the requested
//! size, dispatches one work item per free worker, and treats the loss
//! of a started worker as fatal for the run.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::data_access::WorkItem;
use crate::emit;
use crate::error::{ConfigError, PoolError};
use crate::metrics::events::{WorkerLost, WorkersAlive};
use crate::processor::FileProcessor;

/// Builds one processor per worker. Invoked once per worker at startup;
/// an error means that worker never becomes ready.
pub type WorkerFactory = Box<dyn Fn(usize) -> Result<FileProcessor, ConfigError> + Send>;

/// Execution pool contract the dispatch loop drives.
///
/// The orchestration algorithm only needs bounded admission with
/// unordered completion collection; it never depends on how the pool
/// schedules its units.
#[async_trait]
pub trait ExecutionPool: Send {
    /// Number of ready execution units.
    fn size(&self) -> usize;

    /// Number of items dispatched and not yet completed.
    fn in_flight(&self) -> usize;

    /// True when at least one unit has spare capacity.
    fn has_free(&self) -> bool;

    /// Dispatch one work item to a free unit.
    async fn submit(&mut self, item: WorkItem) -> Result<(), PoolError>;

    /// Block until the next completion, in completion order.
    async fn next_completed(&mut self) -> Result<(), PoolError>;

    /// Wait out all in-flight items and shut the units down.
    async fn drain(&mut self) -> Result<(), PoolError>;
}

/// Message a worker (or its watcher) sends back to the pool.
enum Completion {
    /// One work item finished, successfully or absorbed as an item fault.
    Done { worker: usize },
    /// The worker drained its queue, flushed, and exited cleanly.
    Finished { worker: usize },
    /// The worker task died mid-run.
    Lost { worker: usize, message: String },
}

struct WorkerHandle {
    id: usize,
    tx: Option<mpsc::Sender<WorkItem>>,
}

/// Pool of worker tasks with single-item dispatch per worker.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    completion_rx: mpsc::Receiver<Completion>,
    free: VecDeque<usize>,
    in_flight: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("free", &self.free)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl WorkerPool {
    /// Create and start the pool.
    ///
    /// Tries to start `requested` workers, sleeping `creation_delay`
    /// between creations and giving up on stragglers once
    /// `startup_window` has elapsed. The run proceeds, degraded, as long
    /// as at least half of the requested workers became ready.
    pub async fn start(
        requested: usize,
        creation_delay: Duration,
        startup_window: Duration,
        factory: WorkerFactory,
    ) -> Result<Self, PoolError> {
        let (completion_tx, completion_rx) = mpsc::channel(requested.max(1) * 2);
        let mut workers = Vec::with_capacity(requested);
        let started = Instant::now();

        for attempt in 0..requested {
            if attempt > 0 && !creation_delay.is_zero() {
                tokio::time::sleep(creation_delay).await;
            }
            if started.elapsed() > startup_window {
                warn!("Startup window elapsed after {} workers", workers.len());
                break;
            }
            let processor = match factory(attempt) {
                Ok(processor) => processor,
                Err(e) => {
                    warn!("Worker {attempt} failed to start: {e}");
                    continue;
                }
            };

            // Pool-local id is the slot index, dense even when some
            // creation attempts failed.
            let id = workers.len();
            let (tx, rx) = mpsc::channel::<WorkItem>(1);
            let join = tokio::spawn(worker_loop(id, rx, processor, completion_tx.clone()));
            let watcher_tx = completion_tx.clone();
            tokio::spawn(async move {
                let completion = match join.await {
                    Ok(()) => Completion::Finished { worker: id },
                    Err(e) => Completion::Lost {
                        worker: id,
                        message: e.to_string(),
                    },
                };
                let _ = watcher_tx.send(completion).await;
            });
            workers.push(WorkerHandle { id, tx: Some(tx) });
        }

        let ready = workers.len();
        if 2 * ready < requested {
            return Err(PoolError::TooFewWorkers { requested, ready });
        }
        if ready < requested {
            warn!("Running degraded: {ready} of {requested} workers ready");
        } else {
            info!("Started {ready} workers");
        }
        emit!(WorkersAlive { count: ready });

        let free = workers.iter().map(|w| w.id).collect();
        Ok(Self {
            workers,
            completion_rx,
            free,
            in_flight: 0,
        })
    }

    fn lost(&self, worker: usize, message: &str) -> PoolError {
        emit!(WorkerLost);
        emit!(WorkersAlive {
            count: self.workers.len().saturating_sub(1)
        });
        PoolError::WorkerLost {
            worker,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ExecutionPool for WorkerPool {
    fn size(&self) -> usize {
        self.workers.len()
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    async fn submit(&mut self, item: WorkItem) -> Result<(), PoolError> {
        let worker = self.free.pop_front().ok_or(PoolError::NoFreeWorker)?;
        debug!("Dispatching {} to worker {worker}", item.path);
        let tx = self.workers[worker]
            .tx
            .as_ref()
            .ok_or(PoolError::NoFreeWorker)?;
        if tx.send(item).await.is_err() {
            return Err(self.lost(worker, "request channel closed"));
        }
        self.in_flight += 1;
        Ok(())
    }

    /// Returns an error if a worker was lost instead; the first loss
    /// aborts the run rather than risking silently dropped work.
    async fn next_completed(&mut self) -> Result<(), PoolError> {
        loop {
            match self.completion_rx.recv().await {
                Some(Completion::Done { worker }) => {
                    self.in_flight -= 1;
                    self.free.push_back(worker);
                    return Ok(());
                }
                Some(Completion::Finished { worker }) => {
                    // Clean exits only happen while draining.
                    debug!("Worker {worker} finished");
                }
                Some(Completion::Lost { worker, message }) => {
                    return Err(self.lost(worker, &message));
                }
                None => {
                    return Err(PoolError::WorkerLost {
                        worker: usize::MAX,
                        message: "completion channel closed".to_string(),
                    })
                }
            }
        }
    }

    /// Closing a worker's request channel makes it flush its transform
    /// before exiting; drain returns once every worker has flushed.
    async fn drain(&mut self) -> Result<(), PoolError> {
        while self.in_flight > 0 {
            self.next_completed().await?;
        }
        for worker in &mut self.workers {
            worker.tx = None;
        }

        let mut remaining = self.workers.len();
        while remaining > 0 {
            match self.completion_rx.recv().await {
                Some(Completion::Finished { worker }) => {
                    debug!("Worker {worker} flushed and exited");
                    remaining -= 1;
                }
                Some(Completion::Lost { worker, message }) => {
                    return Err(self.lost(worker, &message));
                }
                Some(Completion::Done { .. }) | None => {
                    return Err(PoolError::WorkerLost {
                        worker: usize::MAX,
                        message: "completion channel closed during drain".to_string(),
                    })
                }
            }
        }
        emit!(WorkersAlive { count: 0 });
        Ok(())
    }
}

async fn worker_loop(
    id: usize,
    mut rx: mpsc::Receiver<WorkItem>,
    mut processor: FileProcessor,
    done_tx: mpsc::Sender<Completion>,
) {
    debug!("Worker {id} ready");
    while let Some(item) = rx.recv().await {
        processor.process(&item).await;
        if done_tx.send(Completion::Done { worker: id }).await.is_err() {
            // Pool dropped its receiver; nothing left to report to.
            return;
        }
    }
    processor.flush().await;
    debug!("Worker {id} flushed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, OutputConfig, RunConfig, RuntimeConfig, StageConfig};
    use crate::data_access::{DataAccessRef, StorageDataAccess};
    use crate::error::TransformError;
    use crate::processor::WorkerTransform;
    use crate::stats::{keys, Statistics};
    use crate::transform::{BinaryTransform, ByteUnit, Metrics, TransformResult};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Echo;

    impl BinaryTransform for Echo {
        fn transform(
            &mut self,
            _file_name: &str,
            content: Bytes,
        ) -> Result<TransformResult, TransformError> {
            Ok(TransformResult {
                outputs: vec![ByteUnit::new(".txt", content)],
                metrics: Metrics::new(),
            })
        }
    }

    struct Panicking;

    impl BinaryTransform for Panicking {
        fn transform(
            &mut self,
            _file_name: &str,
            _content: Bytes,
        ) -> Result<TransformResult, TransformError> {
            panic!("worker task dies");
        }
    }

    fn data_access(input: &TempDir, output: &TempDir) -> DataAccessRef {
        let config = RunConfig {
            input: InputConfig {
                path: input.path().to_str().unwrap().to_string(),
                storage_options: HashMap::new(),
                files_to_use: ".txt".to_string(),
                max_files: -1,
                n_samples: -1,
            },
            output: OutputConfig {
                path: output.path().to_str().unwrap().to_string(),
                storage_options: HashMap::new(),
                checkpoint: false,
            },
            runtime: RuntimeConfig::default(),
            pipeline: vec![StageConfig {
                name: "noop".to_string(),
                params: HashMap::new(),
            }],
        };
        Arc::new(StorageDataAccess::from_config(&config).unwrap())
    }

    fn echo_factory(
        data_access: DataAccessRef,
        stats: Statistics,
        fail_from: usize,
    ) -> WorkerFactory {
        Box::new(move |id| {
            if id >= fail_from {
                return Err(crate::error::ConfigError::UnknownTransform {
                    name: format!("worker-{id}"),
                });
            }
            Ok(FileProcessor::new(
                data_access.clone(),
                WorkerTransform::Binary(Box::new(Echo)),
                stats.clone(),
            ))
        })
    }

    #[tokio::test]
    async fn test_too_few_workers_is_fatal() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let factory = echo_factory(data_access(&input, &output), Statistics::new(), 4);

        let err = WorkerPool::start(10, Duration::ZERO, Duration::from_secs(120), factory)
            .await
            .unwrap_err();
        assert!(
            matches!(err, PoolError::TooFewWorkers { requested: 10, ready: 4 })
        );
    }

    #[tokio::test]
    async fn test_degraded_start_above_half() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let factory = echo_factory(data_access(&input, &output), Statistics::new(), 6);

        let mut pool = WorkerPool::start(10, Duration::ZERO, Duration::from_secs(120), factory)
            .await
            .unwrap();
        assert_eq!(pool.size(), 6);
        pool.drain().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("a.txt"), "payload").unwrap();
        let stats = Statistics::new();
        let factory = echo_factory(data_access(&input, &output), stats.clone(), 2);

        let mut pool = WorkerPool::start(2, Duration::ZERO, Duration::from_secs(120), factory)
            .await
            .unwrap();
        assert!(pool.has_free());
        pool.submit(WorkItem {
            path: "a.txt".to_string(),
            size: 7,
        })
        .await
        .unwrap();
        assert_eq!(pool.in_flight(), 1);

        pool.next_completed().await.unwrap();
        assert_eq!(pool.in_flight(), 0);
        pool.drain().await.unwrap();

        assert!(output.path().join("a.txt").exists());
        assert_eq!(stats.snapshot().await[keys::RESULT_FILES], 1);
    }

    #[tokio::test]
    async fn test_worker_loss_is_fatal() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("a.txt"), "payload").unwrap();
        let da = data_access(&input, &output);
        let stats = Statistics::new();
        let factory: WorkerFactory = Box::new(move |_| {
            Ok(FileProcessor::new(
                da.clone(),
                WorkerTransform::Binary(Box::new(Panicking)),
                stats.clone(),
            ))
        });

        let mut pool = WorkerPool::start(1, Duration::ZERO, Duration::from_secs(120), factory)
            .await
            .unwrap();
        pool.submit(WorkItem {
            path: "a.txt".to_string(),
            size: 7,
        })
        .await
        .unwrap();

        let err = pool.next_completed().await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerLost { .. }));
    }
}
