//! Row-count resize transform.
//!
//! Re-partitions rows across output tables so each emitted table holds at
//! most `max_rows_per_table` rows. Small inputs coalesce, large inputs
//! split. The remainder buffer only drains at flush, so no row is ever
//! lost or duplicated across a run.

use crate::error::ConfigError;
use crate::error::TransformError;
use crate::transform::registry::{param_u64, StageParams};
use crate::transform::table::{Table, TableResult, TableTransform};
use crate::transform::Metrics;

/// Read and validate the `max_rows_per_table` parameter.
pub fn max_rows_param(params: &StageParams) -> Result<usize, ConfigError> {
    let max_rows =
        param_u64(params, "resize", "max_rows_per_table")?.ok_or_else(|| {
            ConfigError::InvalidParameter {
                name: "resize".to_string(),
                param: "max_rows_per_table".to_string(),
                message: "parameter is required".to_string(),
            }
        })?;
    if max_rows == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "resize".to_string(),
            param: "max_rows_per_table".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(max_rows as usize)
}

/// Transform that coalesces/splits tables to a target row count.
pub struct ResizeTransform {
    max_rows: usize,
    buffer: Table,
}

impl ResizeTransform {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows,
            buffer: Table::default(),
        }
    }

    fn drain_full_tables(&mut self) -> Vec<Table> {
        let mut out = Vec::new();
        while self.buffer.num_rows() >= self.max_rows {
            out.push(self.buffer.split_off_front(self.max_rows));
        }
        out
    }
}

impl TableTransform for ResizeTransform {
    fn transform_table(
        &mut self,
        _file_name: &str,
        table: Table,
    ) -> Result<TableResult, TransformError> {
        self.buffer.extend(table);
        let tables = self.drain_full_tables();
        Ok(TableResult {
            tables,
            metrics: Metrics::new(),
        })
    }

    fn flush_tables(&mut self) -> Result<TableResult, TransformError> {
        let mut tables = Vec::new();
        if !self.buffer.is_empty() {
            tables.push(std::mem::take(&mut self.buffer));
        }
        Ok(TableResult {
            tables,
            metrics: Metrics::new(),
        })
    }
}
