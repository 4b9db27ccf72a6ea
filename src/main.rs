//! millrun: a standalone multi-stage file transformation tool.
//!
//! Reads files from an input folder (S3 or local filesystem), runs each
//! through a configured transform pipeline on a bounded worker pool, and
//! writes results plus a job metadata record to an output folder.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use millrun::config::RunConfig;
use millrun::error::{ConfigSnafu, RunError};
use millrun::orchestrator::run;
use millrun::transform::registry::{build_worker_transform, TransformRegistry};

/// Multi-stage file transformation tool.
#[derive(Parser, Debug)]
#[command(name = "millrun")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), RunError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("millrun starting");

    let config = RunConfig::from_file(&args.config).context(ConfigSnafu)?;
    let registry = Arc::new(TransformRegistry::with_builtins());

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Input: {}", config.input.path);
        info!("Output: {}", config.output.path);
        info!("Workers: {}", config.runtime.pool_size);
        // Building the transform checks stage names and parameters.
        build_worker_transform(&registry, &config.pipeline).context(ConfigSnafu)?;
        for stage in &config.pipeline {
            info!("  stage: {}", stage.name);
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let summary = run(config, registry).await?;

    info!("Run completed successfully");
    info!("  Items enumerated: {}", summary.items);
    for (key, value) in sorted(&summary.stats) {
        info!("  {key}: {value}");
    }

    Ok(())
}

fn sorted(stats: &std::collections::HashMap<String, u64>) -> Vec<(&String, &u64)> {
    let mut entries: Vec<_> = stats.iter().collect();
    entries.sort_by_key(|(key, _)| key.as_str());
    entries
}
