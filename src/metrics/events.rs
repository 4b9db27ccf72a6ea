//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a run. Events
//! implement the `InternalEvent` trait which records the corresponding
//! counter or gauge metric.

use metrics::{counter, gauge};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Status of a processed work item.
#[derive(Debug, Clone, Copy)]
pub enum ItemStatus {
    Success,
    Skipped,
    Failed,
}

impl ItemStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Success => "success",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "failed",
        }
    }
}

/// Stage at which an item failure occurred.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Read,
    Transform,
    Write,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Read => "read",
            FailureStage::Transform => "transform",
            FailureStage::Write => "write",
        }
    }
}

/// Event emitted when a work item completes processing.
pub struct ItemProcessed {
    pub status: ItemStatus,
}

impl InternalEvent for ItemProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Item processed");
        counter!("millrun_items_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when an item fails at a specific stage.
pub struct ItemFailed {
    pub stage: FailureStage,
}

impl InternalEvent for ItemFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Item failed");
        counter!("millrun_items_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when source bytes are read.
pub struct SourceBytesRead {
    pub bytes: u64,
}

impl InternalEvent for SourceBytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Source bytes read");
        counter!("millrun_source_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when result bytes are written.
pub struct ResultBytesWritten {
    pub bytes: u64,
}

impl InternalEvent for ResultBytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Result bytes written");
        counter!("millrun_result_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when a result file is produced.
pub struct ResultFileWritten;

impl InternalEvent for ResultFileWritten {
    fn emit(self) {
        counter!("millrun_result_files_total").increment(1);
    }
}

/// Event emitted when the data access layer retries a storage call.
pub struct DataAccessRetry {
    pub count: u64,
}

impl InternalEvent for DataAccessRetry {
    fn emit(self) {
        trace!(count = self.count, "Data access retries");
        counter!("millrun_data_access_retries_total").increment(self.count);
    }
}

/// Gauge event for the number of items currently in flight.
pub struct ItemsInFlight {
    pub count: usize,
}

impl InternalEvent for ItemsInFlight {
    fn emit(self) {
        gauge!("millrun_items_in_flight").set(self.count as f64);
    }
}

/// Gauge event for the number of completed items.
pub struct ItemsCompleted {
    pub count: usize,
}

impl InternalEvent for ItemsCompleted {
    fn emit(self) {
        gauge!("millrun_items_completed").set(self.count as f64);
    }
}

/// Gauge event for the number of live workers in the pool.
pub struct WorkersAlive {
    pub count: usize,
}

impl InternalEvent for WorkersAlive {
    fn emit(self) {
        gauge!("millrun_workers_alive").set(self.count as f64);
    }
}

/// Event emitted when a worker is lost mid-run.
pub struct WorkerLost;

impl InternalEvent for WorkerLost {
    fn emit(self) {
        counter!("millrun_workers_lost_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_stage_as_str() {
        assert_eq!(FailureStage::Read.as_str(), "read");
        assert_eq!(FailureStage::Transform.as_str(), "transform");
        assert_eq!(FailureStage::Write.as_str(), "write");
    }

    #[test]
    fn test_item_status_as_str() {
        assert_eq!(ItemStatus::Success.as_str(), "success");
        assert_eq!(ItemStatus::Skipped.as_str(), "skipped");
        assert_eq!(ItemStatus::Failed.as_str(), "failed");
    }
}
