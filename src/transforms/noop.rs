//! Pass-through transform.
//!
//! Emits every input table unchanged. Useful for smoke-testing a
//! deployment end to end and as the minimal example of a table
//! transform. The optional sleep simulates per-table processing cost.

use std::time::Duration;

use crate::error::TransformError;
use crate::transform::table::{Table, TableResult, TableTransform};
use crate::transform::Metrics;

/// Transform that returns its input unchanged.
pub struct NoopTransform {
    sleep: Duration,
}

impl NoopTransform {
    pub fn new(sleep_ms: u64) -> Self {
        Self {
            sleep: Duration::from_millis(sleep_ms),
        }
    }
}

impl TableTransform for NoopTransform {
    fn transform_table(
        &mut self,
        _file_name: &str,
        table: Table,
    ) -> Result<TableResult, TransformError> {
        if !self.sleep.is_zero() {
            std::thread::sleep(self.sleep);
        }
        let metrics = Metrics::from([("nrows".to_string(), table.num_rows() as u64)]);
        Ok(TableResult {
            tables: vec![table],
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_passes_table_through() {
        let mut noop = NoopTransform::new(0);
        let table = Table::new(vec![json!({"id": 1}), json!({"id": 2})]);
        let result = noop.transform_table("f.ndjson", table.clone()).unwrap();

        assert_eq!(result.tables, vec![table]);
        assert_eq!(result.metrics["nrows"], 2);
    }

    #[test]
    fn test_noop_default_flush_is_empty() {
        let mut noop = NoopTransform::new(0);
        let flushed = noop.flush_tables().unwrap();
        assert!(flushed.tables.is_empty());
    }
}
