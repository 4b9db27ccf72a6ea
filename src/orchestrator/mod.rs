//! Run orchestration.
//!
//! Drives a whole run: validate configuration, enumerate the work set,
//! start the worker pool, dispatch items one per free worker, drain,
//! and persist the job metadata record. Item faults are absorbed by the
//! workers; anything that surfaces here as an error aborts the run.

pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use snafu::prelude::*;
use tracing::{error, info, warn};

use crate::config::{RunConfig, StageConfig};
use crate::data_access::{
    distinct_folders, DataAccessRef, JobMetadata, LocationDescriptor, StorageDataAccess, WorkItem,
};
use crate::emit;
use crate::error::{ConfigSnafu, DataAccessSnafu, PoolSnafu, RunError};
use crate::metrics::events::{ItemsCompleted, ItemsInFlight};
use crate::processor::{FileProcessor, WorkerTransform};
use crate::stats::Statistics;
use crate::transform::registry::{build_worker_transform, TransformRegistry};
use crate::transform::TransformVariant;

use pool::{ExecutionPool, WorkerFactory, WorkerPool};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Number of work items enumerated for processing.
    pub items: usize,
    /// Final statistics totals.
    pub stats: HashMap<String, u64>,
}

/// Execute a run end to end.
pub async fn run(
    config: RunConfig,
    registry: Arc<TransformRegistry>,
) -> Result<RunSummary, RunError> {
    config.validate().context(ConfigSnafu)?;
    // Build the transform once up front so stage misconfiguration aborts
    // before any storage access.
    let probe = build_worker_transform(&registry, &config.pipeline).context(ConfigSnafu)?;
    let folder_mode = probe.is_folder();
    drop(probe);

    let started_at = Utc::now();
    let data_access: DataAccessRef =
        Arc::new(StorageDataAccess::from_config(&config).context(DataAccessSnafu)?);

    let (mut items, profile) = data_access
        .get_files_to_process()
        .await
        .context(DataAccessSnafu)?;
    if folder_mode {
        items = distinct_folders(&items);
    }
    info!(
        "Enumerated {} work items, {} bytes total",
        items.len(),
        profile.total_bytes
    );

    let stats = Statistics::new();
    let outcome = if items.is_empty() {
        warn!("No input files to process");
        Ok(RunSummary {
            items: 0,
            stats: HashMap::new(),
        })
    } else {
        process_items(&config, &registry, &data_access, &stats, items).await
    };

    // The record reflects the actual outcome; a fatal dispatch fault
    // still leaves a failure record with the partial totals.
    let (status, job_output_stats) = match &outcome {
        Ok(summary) => ("success", summary.stats.clone()),
        Err(_) => ("failure", stats.snapshot().await),
    };
    let metadata = JobMetadata {
        pipeline: pipeline_name(&config.pipeline),
        status: status.to_string(),
        started_at,
        completed_at: Utc::now(),
        job_input_params: sanitized_params(&registry, &config.pipeline),
        size_profile: profile,
        job_output_stats,
        source: LocationDescriptor {
            name: config.input.path.clone(),
            kind: "path".to_string(),
        },
        target: LocationDescriptor {
            name: config.output.path.clone(),
            kind: "path".to_string(),
        },
    };
    // A metadata write failure must not discard already-produced output.
    if let Err(e) = data_access.save_job_metadata(&metadata).await {
        error!("Failed to save job metadata: {e}");
    }

    let summary = outcome?;
    log_stats(&summary.stats);
    Ok(summary)
}

/// Dispatch loop: one item per free worker until the work set drains.
async fn process_items(
    config: &RunConfig,
    registry: &Arc<TransformRegistry>,
    data_access: &DataAccessRef,
    stats: &Statistics,
    items: Vec<WorkItem>,
) -> Result<RunSummary, RunError> {
    let factory = worker_factory(
        registry.clone(),
        config.pipeline.clone(),
        data_access.clone(),
        stats.clone(),
    );
    let mut pool = WorkerPool::start(
        config.runtime.pool_size,
        Duration::from_millis(config.runtime.creation_delay_ms),
        Duration::from_secs(config.runtime.startup_window_secs),
        factory,
    )
    .await
    .context(PoolSnafu)?;

    let total = items.len();
    dispatch(&mut pool, items, config.runtime.print_interval.max(1)).await?;

    Ok(RunSummary {
        items: total,
        stats: stats.snapshot().await,
    })
}

/// Bounded-admission dispatch with unordered completion collection.
async fn dispatch<P: ExecutionPool>(
    pool: &mut P,
    items: Vec<WorkItem>,
    print_interval: usize,
) -> Result<(), RunError> {
    let total = items.len();
    let mut completed = 0usize;
    let started = Instant::now();

    for item in items {
        if !pool.has_free() {
            pool.next_completed().await.context(PoolSnafu)?;
            completed += 1;
            report_progress(completed, total, print_interval, started);
        }
        pool.submit(item).await.context(PoolSnafu)?;
        emit!(ItemsInFlight {
            count: pool.in_flight()
        });
    }

    while pool.in_flight() > 0 {
        pool.next_completed().await.context(PoolSnafu)?;
        completed += 1;
        report_progress(completed, total, print_interval, started);
    }
    pool.drain().await.context(PoolSnafu)?;

    info!(
        "Processed {total} items in {:.3} min",
        started.elapsed().as_secs_f64() / 60.0
    );
    Ok(())
}

fn worker_factory(
    registry: Arc<TransformRegistry>,
    stages: Vec<StageConfig>,
    data_access: DataAccessRef,
    stats: Statistics,
) -> WorkerFactory {
    Box::new(move |_worker| {
        let transform = match build_worker_transform(&registry, &stages)? {
            TransformVariant::Folder(folder) => WorkerTransform::Folder(folder),
            TransformVariant::Binary(binary) => WorkerTransform::Binary(binary),
            TransformVariant::Table(table) => WorkerTransform::Binary(Box::new(table)),
        };
        Ok(FileProcessor::new(
            data_access.clone(),
            transform,
            stats.clone(),
        ))
    })
}

fn report_progress(completed: usize, total: usize, interval: usize, started: Instant) {
    emit!(ItemsCompleted { count: completed });
    if completed % interval == 0 {
        info!(
            "Completed {completed} of {total} items in {:.3} min",
            started.elapsed().as_secs_f64() / 60.0
        );
    }
}

fn pipeline_name(stages: &[StageConfig]) -> String {
    stages
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Stage parameters as JSON, with sensitive keys removed.
fn sanitized_params(
    registry: &TransformRegistry,
    stages: &[StageConfig],
) -> serde_json::Value {
    let stages: Vec<serde_json::Value> = stages
        .iter()
        .map(|stage| {
            let sensitive = registry.sensitive_params(&stage.name);
            let params: HashMap<&String, &serde_yaml::Value> = stage
                .params
                .iter()
                .filter(|(key, _)| !sensitive.contains(key))
                .collect();
            serde_json::json!({
                "name": stage.name,
                "params": serde_json::to_value(&params).unwrap_or(serde_json::Value::Null),
            })
        })
        .collect();
    serde_json::Value::Array(stages)
}

fn log_stats(stats: &HashMap<String, u64>) {
    let mut keys: Vec<&String> = stats.keys().collect();
    keys.sort();
    for key in keys {
        info!("  {key} = {}", stats[key]);
    }
}
