//! Per-worker file processing.
//!
//! A `FileProcessor` owns one transform instance plus a handle to the
//! shared data access layer and statistics accumulator. It drives the
//! read, transform, write cycle for each work item a worker receives and
//! absorbs item-level faults into statistics so one bad file never takes
//! down the run.

use tracing::warn;

use crate::data_access::{DataAccessRef, WorkItem};
use crate::emit;
use crate::metrics::events::{FailureStage, ItemFailed, ItemProcessed, ItemStatus};
use crate::stats::{keys, Statistics};
use crate::transform::{
    split_extension, BinaryTransform, FolderTransform, Metrics, TransformResult,
};

/// Transform capability a worker runs with.
///
/// Binary covers single-stage and pipeline transforms alike; folder
/// workers consume whole folders and emit fully named outputs.
pub enum WorkerTransform {
    Binary(Box<dyn BinaryTransform>),
    Folder(Box<dyn FolderTransform>),
}

/// Drives one work item at a time through read, transform, write.
pub struct FileProcessor {
    data_access: DataAccessRef,
    transform: WorkerTransform,
    stats: Statistics,
    last_file_name: Option<String>,
}

impl FileProcessor {
    pub fn new(data_access: DataAccessRef, transform: WorkerTransform, stats: Statistics) -> Self {
        Self {
            data_access,
            transform,
            stats,
            last_file_name: None,
        }
    }

    /// Process one work item end to end.
    ///
    /// Never returns an error: read, transform, and write faults are
    /// counted in statistics and the item is abandoned. Only a worker
    /// task dying (panic, channel loss) is fatal, and that is detected
    /// by the pool, not here.
    pub async fn process(&mut self, item: &WorkItem) {
        match &mut self.transform {
            WorkerTransform::Binary(_) => self.process_file(item).await,
            WorkerTransform::Folder(_) => self.process_folder(item).await,
        }
    }

    async fn process_file(&mut self, item: &WorkItem) {
        let (content, retries) = match self.data_access.read_file(&item.path).await {
            Ok(read) => read,
            Err(e) => {
                warn!("Failed to read {}: {e}", item.path);
                self.count_retries(e.retries()).await;
                self.stats.add_one(keys::FAILED_READS, 1).await;
                emit!(ItemFailed {
                    stage: FailureStage::Read
                });
                emit!(ItemProcessed {
                    status: ItemStatus::Failed
                });
                return;
            }
        };
        self.count_retries(retries).await;
        self.stats
            .add(&Metrics::from([
                (keys::SOURCE_FILES.to_string(), 1),
                (keys::SOURCE_SIZE.to_string(), content.len() as u64),
            ]))
            .await;
        self.last_file_name = Some(item.path.clone());

        let transform = match &mut self.transform {
            WorkerTransform::Binary(t) => t,
            WorkerTransform::Folder(_) => return,
        };
        let result = match transform.transform(&item.path, content) {
            Ok(result) => result,
            Err(e) => {
                warn!("Transform failed on {}: {e}", item.path);
                self.stats.add_one(keys::TRANSFORM_EXCEPTIONS, 1).await;
                emit!(ItemFailed {
                    stage: FailureStage::Transform
                });
                emit!(ItemProcessed {
                    status: ItemStatus::Failed
                });
                return;
            }
        };

        let status = if result.outputs.is_empty() {
            ItemStatus::Skipped
        } else {
            ItemStatus::Success
        };
        self.submit(&item.path, result, true).await;
        emit!(ItemProcessed { status });
    }

    async fn process_folder(&mut self, item: &WorkItem) {
        let transform = match &mut self.transform {
            WorkerTransform::Folder(t) => t,
            WorkerTransform::Binary(_) => return,
        };
        self.stats.add_one(keys::SOURCE_FILES, 1).await;

        let result = match transform.transform_folder(&item.path) {
            Ok(result) => result,
            Err(e) => {
                warn!("Folder transform failed on {}: {e}", item.path);
                self.stats.add_one(keys::TRANSFORM_EXCEPTIONS, 1).await;
                emit!(ItemFailed {
                    stage: FailureStage::Transform
                });
                emit!(ItemProcessed {
                    status: ItemStatus::Failed
                });
                return;
            }
        };

        let status = if result.outputs.is_empty() {
            ItemStatus::Skipped
        } else {
            ItemStatus::Success
        };
        // Folder transforms name their outputs in full.
        self.submit(&item.path, result, false).await;
        emit!(ItemProcessed { status });
    }

    /// Flush the transform at end-of-stream and write whatever it emits.
    ///
    /// Invoked exactly once per worker, after the pool has delivered the
    /// last work item.
    pub async fn flush(&mut self) {
        let (flushed, names_are_extensions) = match &mut self.transform {
            WorkerTransform::Binary(t) => (t.flush(), true),
            WorkerTransform::Folder(t) => (t.flush(), false),
        };
        let result = match flushed {
            Ok(result) => result,
            Err(e) => {
                warn!("Flush failed: {e}");
                self.stats.add_one(keys::TRANSFORM_EXCEPTIONS, 1).await;
                emit!(ItemFailed {
                    stage: FailureStage::Transform
                });
                return;
            }
        };
        // Flush output is named after the last input with a marker so it
        // can never collide with that input's per-item outputs.
        let base = match &self.last_file_name {
            Some(name) => {
                let (stem, ext) = split_extension(name);
                format!("{stem}_flush{ext}")
            }
            None => "flush".to_string(),
        };
        self.submit(&base, result, names_are_extensions).await;
    }

    /// Write every output of a transform result and merge its metrics.
    ///
    /// With `names_are_extensions`, output names are extensions appended
    /// to the input's stem, indexed when more than one output exists.
    /// Otherwise names are used verbatim.
    async fn submit(
        &mut self,
        input_name: &str,
        result: TransformResult,
        names_are_extensions: bool,
    ) {
        let many = result.outputs.len() > 1;
        for (index, unit) in result.outputs.into_iter().enumerate() {
            let out_name = if !names_are_extensions {
                unit.name
            } else if many {
                let (stem, _) = split_extension(input_name);
                format!("{stem}_{index}{}", unit.name)
            } else {
                self.data_access.output_name(input_name, &unit.name)
            };

            let size = unit.content.len() as u64;
            match self.data_access.save_file(&out_name, unit.content).await {
                Ok(retries) => {
                    self.count_retries(retries).await;
                    self.stats
                        .add(&Metrics::from([
                            (keys::RESULT_FILES.to_string(), 1),
                            (keys::RESULT_SIZE.to_string(), size),
                        ]))
                        .await;
                }
                Err(e) => {
                    warn!("Failed to write {out_name}: {e}");
                    self.count_retries(e.retries()).await;
                    self.stats.add_one(keys::FAILED_WRITES, 1).await;
                    emit!(ItemFailed {
                        stage: FailureStage::Write
                    });
                }
            }
        }
        self.stats.add(&result.metrics).await;
    }

    async fn count_retries(&mut self, retries: u64) {
        if retries > 0 {
            self.stats.add_one(keys::DATA_ACCESS_RETRIES, retries).await;
        }
    }
}
