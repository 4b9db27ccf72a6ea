//! Table transform variant and its codec collaborator.
//!
//! Table transforms operate on structured tabular values instead of raw
//! bytes. The byte payload is decoded by a [`TableCodec`] before the
//! transform-specific logic runs, and results are re-encoded before being
//! wrapped as byte units. The codec is an injected collaborator, so the
//! same transform logic works against any on-disk table format.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use super::{ByteUnit, Metrics, TransformResult};
use crate::error::TransformError;
use crate::stats::keys;

/// A structured tabular value: an ordered collection of row documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Value>,
}

impl Table {
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append all rows of another table.
    pub fn extend(&mut self, other: Table) {
        self.rows.extend(other.rows);
    }

    /// Split off the first `n` rows into a new table.
    pub fn split_off_front(&mut self, n: usize) -> Table {
        let n = n.min(self.rows.len());
        let rest = self.rows.split_off(n);
        Table::new(std::mem::replace(&mut self.rows, rest))
    }
}

/// Decode/encode collaborator between byte payloads and tables.
pub trait TableCodec: Send + Sync {
    /// Decode a byte payload into a table.
    fn decode(&self, name: &str, content: &Bytes) -> Result<Table, TransformError>;

    /// Encode a table back into a byte payload.
    fn encode(&self, table: &Table) -> Result<Bytes, TransformError>;

    /// Extension of the encoded representation, including the dot.
    fn extension(&self) -> &str;
}

/// NDJSON codec: one JSON document per line.
#[derive(Debug, Default)]
pub struct NdjsonCodec;

impl TableCodec for NdjsonCodec {
    fn decode(&self, name: &str, content: &Bytes) -> Result<Table, TransformError> {
        let text = std::str::from_utf8(content).map_err(|e| TransformError::TableDecode {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let mut rows = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let row: Value =
                serde_json::from_str(line).map_err(|e| TransformError::TableDecode {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
            rows.push(row);
        }
        Ok(Table::new(rows))
    }

    fn encode(&self, table: &Table) -> Result<Bytes, TransformError> {
        let mut out = String::new();
        for row in &table.rows {
            let line = serde_json::to_string(row).map_err(|e| TransformError::TableEncode {
                message: e.to_string(),
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(Bytes::from(out))
    }

    fn extension(&self) -> &str {
        ".ndjson"
    }
}

/// Result of one table transform invocation.
#[derive(Debug, Clone, Default)]
pub struct TableResult {
    pub tables: Vec<Table>,
    pub metrics: Metrics,
}

/// A transform over decoded tables.
pub trait TableTransform: Send {
    /// Convert the input table into zero or more output tables.
    fn transform_table(&mut self, file_name: &str, table: Table)
        -> Result<TableResult, TransformError>;

    /// Return any buffered tables at end-of-stream.
    fn flush_tables(&mut self) -> Result<TableResult, TransformError> {
        Ok(TableResult::default())
    }
}

/// Adapter that runs a table transform under the binary contract.
///
/// Decodes input through the codec, applies the table logic, re-encodes
/// every output table, and names each output with the codec extension.
/// Decoded tables with zero rows are skipped and counted; downstream
/// stages never see them.
pub struct TableStage {
    transform: Box<dyn TableTransform>,
    codec: Arc<dyn TableCodec>,
}

impl TableStage {
    pub fn new(transform: Box<dyn TableTransform>, codec: Arc<dyn TableCodec>) -> Self {
        Self { transform, codec }
    }

    fn encode_result(&self, result: TableResult) -> Result<TransformResult, TransformError> {
        let mut outputs = Vec::with_capacity(result.tables.len());
        let mut metrics = result.metrics;
        for table in &result.tables {
            let encoded = self.codec.encode(table)?;
            *metrics.entry(keys::RESULT_DOC_COUNT.to_string()).or_insert(0) +=
                table.num_rows() as u64;
            outputs.push(ByteUnit::new(self.codec.extension(), encoded));
        }
        Ok(TransformResult { outputs, metrics })
    }
}

impl super::BinaryTransform for TableStage {
    fn transform(
        &mut self,
        file_name: &str,
        content: Bytes,
    ) -> Result<TransformResult, TransformError> {
        let table = self.codec.decode(file_name, &content)?;
        if table.is_empty() {
            let metrics = Metrics::from([(keys::SKIPPED_EMPTY_TABLES.to_string(), 1)]);
            return Ok(TransformResult {
                outputs: vec![],
                metrics,
            });
        }

        let doc_count = table.num_rows() as u64;
        let mut result = self.transform.transform_table(file_name, table)?;
        *result
            .metrics
            .entry(keys::SOURCE_DOC_COUNT.to_string())
            .or_insert(0) += doc_count;
        self.encode_result(result)
    }

    fn flush(&mut self) -> Result<TransformResult, TransformError> {
        let result = self.transform.flush_tables()?;
        self.encode_result(result)
    }
}
