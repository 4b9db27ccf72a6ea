//! millrun: a multi-stage file transformation engine.
//!
//! millrun enumerates files in an input folder, runs each through a
//! configured pipeline of transforms on a bounded worker pool, and
//! writes the results to an output folder along with run statistics and
//! a job metadata record.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use millrun::{run, RunConfig, TransformRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), millrun::error::RunError> {
//!     let config = RunConfig::from_file("config.yaml")?;
//!     let registry = Arc::new(TransformRegistry::with_builtins());
//!     let summary = run(config, registry).await?;
//!     println!("Processed {} items", summary.items);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data_access;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod stats;
pub mod storage;
pub mod transform;
pub mod transforms;

// Re-export main types
pub use config::RunConfig;
pub use orchestrator::{run, RunSummary};
pub use stats::Statistics;
pub use storage::{StorageProvider, StorageProviderRef};
pub use transform::registry::TransformRegistry;
