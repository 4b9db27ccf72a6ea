//! Transform capability model.
//!
//! A transform converts one named byte payload (or a whole folder) into
//! zero or more named byte payloads plus a metrics map. Three capability
//! variants exist: whole-file binary, structured table (see [`table`]),
//! and whole-folder. Table transforms are adapted onto the binary
//! contract, so pipelines compose over `BinaryTransform` only.

pub mod pipeline;
pub mod registry;
pub mod table;

use bytes::Bytes;
use std::collections::HashMap;

use crate::error::TransformError;
use table::TableStage;

/// Named metrics produced by a transform invocation. Values are counts or
/// byte sizes and are merged by addition.
pub type Metrics = HashMap<String, u64>;

/// An opaque file-like payload plus a logical name.
///
/// The name carries the extension chain used to derive output names as
/// data moves through a pipeline. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteUnit {
    pub name: String,
    pub content: Bytes,
}

impl ByteUnit {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Result of one transform invocation: ordered outputs plus metrics.
#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub outputs: Vec<ByteUnit>,
    pub metrics: Metrics,
}

impl TransformResult {
    /// An empty result: no outputs, no metrics.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge another metrics map into this result by numeric addition.
    pub fn merge_metrics(&mut self, other: &Metrics) {
        merge_metrics(&mut self.metrics, other);
    }
}

/// Merge `deltas` into `into` by numeric addition per key.
pub fn merge_metrics(into: &mut Metrics, deltas: &Metrics) {
    for (key, val) in deltas {
        *into.entry(key.clone()).or_insert(0) += val;
    }
}

/// Split a file name into its stem and extension (including the dot).
///
/// `part-00.a.parquet` splits into `("part-00.a", ".parquet")`; names
/// without a dot yield an empty extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        // A leading dot is a hidden-file marker, not an extension.
        Some(0) | None => (name, ""),
        Some(idx) => (&name[..idx], &name[idx..]),
    }
}

/// A whole-file transform: one named byte payload in, zero or more out.
///
/// Implementations must never abort the process; all failures surface as
/// `TransformError` and are classified by the caller.
pub trait BinaryTransform: Send {
    /// Convert the input payload into zero or more output payloads.
    ///
    /// Each output's name is the extension to use when deriving the
    /// output file name.
    fn transform(&mut self, file_name: &str, content: Bytes)
        -> Result<TransformResult, TransformError>;

    /// Return any buffered output at end-of-stream.
    ///
    /// Transforms that coalesce data across calls emit the remainder
    /// here. Invoked exactly once per worker lifetime, after the last
    /// work item. The default returns an empty result.
    fn flush(&mut self) -> Result<TransformResult, TransformError> {
        Ok(TransformResult::empty())
    }
}

/// A whole-folder transform, for units of work spanning multiple files.
pub trait FolderTransform: Send {
    /// Convert the named folder into zero or more output payloads.
    ///
    /// Output names are full file names, not extensions.
    fn transform_folder(&mut self, folder_name: &str)
        -> Result<TransformResult, TransformError>;

    /// Return any buffered output at end-of-stream.
    fn flush(&mut self) -> Result<TransformResult, TransformError> {
        Ok(TransformResult::empty())
    }
}

/// Closed set of transform capability variants.
pub enum TransformVariant {
    /// Whole-file transform over raw bytes.
    Binary(Box<dyn BinaryTransform>),
    /// Table transform adapted onto the binary contract via its codec.
    Table(TableStage),
    /// Whole-folder transform.
    Folder(Box<dyn FolderTransform>),
}

impl std::fmt::Debug for TransformVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformVariant::Binary(_) => f.write_str("Binary(..)"),
            TransformVariant::Table(_) => f.write_str("Table(..)"),
            TransformVariant::Folder(_) => f.write_str("Folder(..)"),
        }
    }
}

impl TransformVariant {
    /// Convert into a binary-capable transform, if this variant has one.
    ///
    /// Folder transforms have no per-file contract and return `None`.
    pub fn into_binary(self) -> Option<Box<dyn BinaryTransform>> {
        match self {
            TransformVariant::Binary(t) => Some(t),
            TransformVariant::Table(t) => Some(Box::new(t)),
            TransformVariant::Folder(_) => None,
        }
    }

    /// True for the folder capability.
    pub fn is_folder(&self) -> bool {
        matches!(self, TransformVariant::Folder(_))
    }
}
