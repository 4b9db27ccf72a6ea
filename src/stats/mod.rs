//! Run statistics aggregation.
//!
//! A single logical accumulator of named counters shared by every worker
//! in a run. All mutation goes through `add`/`overwrite`, serialized by
//! the accumulator's own lock; callers never read-modify-write. Merges
//! are commutative and associative, so final totals are independent of
//! completion order.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::metrics::events::{
    DataAccessRetry, ResultBytesWritten, ResultFileWritten, SourceBytesRead,
};
use crate::emit;
use crate::transform::Metrics;

/// Fixed statistics key vocabulary.
///
/// Any other numeric key a transform reports is still summed, just not
/// specially reported.
pub mod keys {
    pub const SOURCE_FILES: &str = "source_files";
    pub const SOURCE_SIZE: &str = "source_size";
    pub const RESULT_FILES: &str = "result_files";
    pub const RESULT_SIZE: &str = "result_size";
    pub const SOURCE_DOC_COUNT: &str = "source_doc_count";
    pub const RESULT_DOC_COUNT: &str = "result_doc_count";
    pub const SKIPPED_EMPTY_TABLES: &str = "skipped_empty_tables";
    pub const FAILED_READS: &str = "failed_reads";
    pub const FAILED_WRITES: &str = "failed_writes";
    pub const TRANSFORM_EXCEPTIONS: &str = "transform_exceptions";
    pub const DATA_ACCESS_RETRIES: &str = "data_access_retries";
}

/// Shared, lock-serialized statistics accumulator.
///
/// Cloning shares the underlying accumulator; every worker holds a clone
/// and the orchestrator snapshots the totals once at flush time.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    totals: Arc<Mutex<HashMap<String, u64>>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add deltas to the totals: `total[key] += deltas[key]` per key.
    ///
    /// Safe under concurrent invocation from many workers; the lock is
    /// the single serialization point.
    pub async fn add(&self, deltas: &Metrics) {
        if deltas.is_empty() {
            return;
        }
        let mut totals = self.totals.lock().await;
        for (key, val) in deltas {
            *totals.entry(key.clone()).or_insert(0) += val;
            if *val > 0 {
                match key.as_str() {
                    keys::SOURCE_SIZE => emit!(SourceBytesRead { bytes: *val }),
                    keys::RESULT_FILES => emit!(ResultFileWritten),
                    keys::RESULT_SIZE => emit!(ResultBytesWritten { bytes: *val }),
                    keys::DATA_ACCESS_RETRIES => emit!(DataAccessRetry { count: *val }),
                    _ => {}
                }
            }
        }
    }

    /// Replace the entire totals map.
    ///
    /// Reset path for tests and re-runs only; never used while workers
    /// are producing deltas.
    pub async fn overwrite(&self, totals: HashMap<String, u64>) {
        *self.totals.lock().await = totals;
    }

    /// Read the current totals.
    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.totals.lock().await.clone()
    }

    /// Convenience for a single-key delta.
    pub async fn add_one(&self, key: &str, val: u64) {
        self.add(&Metrics::from([(key.to_string(), val)])).await;
    }
}
