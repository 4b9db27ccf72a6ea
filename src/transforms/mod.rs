//! Built-in reference transforms.
//!
//! These ship with the engine both as working examples and as the
//! transforms exercised by the integration tests: `noop` passes tables
//! through unchanged and `resize` re-partitions rows across output
//! tables.

mod noop;
mod resize;

pub use noop::NoopTransform;
pub use resize::ResizeTransform;

use std::sync::Arc;

use crate::transform::registry::{param_u64, TransformRegistry};
use crate::transform::table::{NdjsonCodec, TableStage};
use crate::transform::TransformVariant;

/// Register the built-in transforms.
pub fn register_builtins(registry: &mut TransformRegistry) {
    registry.register("noop", &["pwd"], |params| {
        let sleep_ms = param_u64(params, "noop", "sleep_ms")?.unwrap_or(0);
        Ok(TransformVariant::Table(TableStage::new(
            Box::new(NoopTransform::new(sleep_ms)),
            Arc::new(NdjsonCodec),
        )))
    });

    registry.register("resize", &[], |params| {
        let max_rows = resize::max_rows_param(params)?;
        Ok(TransformVariant::Table(TableStage::new(
            Box::new(ResizeTransform::new(max_rows)),
            Arc::new(NdjsonCodec),
        )))
    });
}
