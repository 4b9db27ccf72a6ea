//! Metrics and observability infrastructure for millrun.
//!
//! This module groups all observability-related components:
//! - `events`: Internal event types and the `InternalEvent` trait
//!
//! millrun does not wire a metrics exporter itself; the embedding process
//! installs a recorder (Prometheus or otherwise) and the events recorded
//! here flow into it.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding counter or gauge metric.
///
/// # Example
///
/// ```ignore
/// use millrun::metrics::events::SourceBytesRead;
///
/// emit!(SourceBytesRead { bytes: 1024 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
