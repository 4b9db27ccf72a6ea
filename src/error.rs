//! Error types for millrun using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. The taxonomy mirrors the fault
//! classes of the execution model: configuration faults abort before any
//! item is processed, item faults are absorbed into statistics by the
//! file processor, and pool faults abort the whole run.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
///
/// All of these are fatal: they are detected before any work item is
/// dispatched and abort the run with no partial output.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input path is empty.
    #[snafu(display("Input path cannot be empty"))]
    EmptyInputPath,

    /// Output path is empty.
    #[snafu(display("Output path cannot be empty"))]
    EmptyOutputPath,

    /// Pipeline has no stages.
    #[snafu(display("Pipeline must have at least one stage"))]
    EmptyPipeline,

    /// Pool size is zero.
    #[snafu(display("Worker pool size must be at least 1"))]
    ZeroPoolSize,

    /// A stage references a transform name that is not registered.
    #[snafu(display("Unknown transform: {name}"))]
    UnknownTransform { name: String },

    /// A stage parameter is missing or has the wrong type.
    #[snafu(display("Invalid parameter {param} for transform {name}: {message}"))]
    InvalidParameter {
        name: String,
        param: String,
        message: String,
    },

    /// A folder transform appears inside a multi-stage pipeline.
    #[snafu(display("Folder transform {name} cannot be part of a multi-stage pipeline"))]
    FolderInPipeline { name: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Transform Errors ============

/// Errors raised inside a transform or its codec collaborator.
///
/// These are recoverable item faults: the file processor counts them and
/// continues with the next work item.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// Failed to decode a byte payload into a table.
    #[snafu(display("Failed to decode table from {name}: {message}"))]
    TableDecode { name: String, message: String },

    /// Failed to encode a table back into bytes.
    #[snafu(display("Failed to encode table: {message}"))]
    TableEncode { message: String },

    /// Transform-specific processing failure.
    #[snafu(display("Transform {name} failed: {message}"))]
    Execution { name: String, message: String },
}

// ============ Data Access Errors ============

/// Errors surfaced by the data access collaborator.
///
/// Read/write variants carry the number of internal retries that were
/// attempted; the count is advisory telemetry for statistics, not a
/// correctness signal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DataAccessError {
    /// A storage provider could not be created.
    #[snafu(display("Failed to initialize storage provider"))]
    Provider { source: StorageError },

    /// File listing failed.
    #[snafu(display("Failed to list input files"))]
    ListFiles { source: StorageError },

    /// Read failed after exhausting the retry budget.
    #[snafu(display("Failed to read {path} after {retries} retries"))]
    ReadExhausted {
        path: String,
        retries: u64,
        source: StorageError,
    },

    /// Write failed after exhausting the retry budget.
    #[snafu(display("Failed to write {path} after {retries} retries"))]
    WriteExhausted {
        path: String,
        retries: u64,
        source: StorageError,
    },

    /// Job metadata could not be serialized.
    #[snafu(display("Failed to serialize job metadata"))]
    MetadataSerialize { source: serde_json::Error },
}

impl DataAccessError {
    /// Number of internal retries attempted before this fault surfaced.
    pub fn retries(&self) -> u64 {
        match self {
            DataAccessError::ReadExhausted { retries, .. }
            | DataAccessError::WriteExhausted { retries, .. } => *retries,
            _ => 0,
        }
    }
}

// ============ Pool Errors ============

/// Fatal-class errors from the worker pool.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PoolError {
    /// Fewer than half of the requested workers became ready.
    #[snafu(display("Too few workers started: requested {requested}, ready {ready}"))]
    TooFewWorkers { requested: usize, ready: usize },

    /// A worker became unreachable mid-run (task died or channel lost).
    #[snafu(display("Worker {worker} lost: {message}"))]
    WorkerLost { worker: usize, message: String },

    /// Submitted a work item while no worker had spare capacity.
    #[snafu(display("Submit called with no free worker"))]
    NoFreeWorker,
}

// ============ Run Error (top-level) ============

/// Top-level errors that aggregate all fatal conditions of a run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Input enumeration failed.
    #[snafu(display("Data access error"))]
    DataAccess { source: DataAccessError },

    /// Worker pool error.
    #[snafu(display("Worker pool error"))]
    Pool { source: PoolError },
}

impl RunError {
    /// True when the run aborted because of worker loss, as opposed to a
    /// fault detected before any item was dispatched.
    pub fn is_worker_loss(&self) -> bool {
        matches!(
            self,
            RunError::Pool {
                source: PoolError::WorkerLost { .. }
            }
        )
    }
}
