//! Data access layer.
//!
//! The narrow interface the orchestrator and file processor consume:
//! enumerate input files (with checkpoint filtering, sampling, and a size
//! profile), read and write payloads with a bounded internal retry
//! budget, derive output names, and persist the job metadata record.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use snafu::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{
    DataAccessError, ListFilesSnafu, MetadataSerializeSnafu, ProviderSnafu, StorageError,
};
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::transform::split_extension;

/// Well-known name of the job metadata record, relative to the output root.
pub const METADATA_FILE: &str = "metadata.json";

/// One discovered unit of work: an input path plus its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: String,
    pub size: u64,
}

/// Aggregate profile of the enumerated input sizes.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SizeProfile {
    pub num_files: usize,
    pub total_bytes: u64,
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl SizeProfile {
    /// Compute the profile of a work item set.
    pub fn of(items: &[WorkItem]) -> Self {
        if items.is_empty() {
            return Self::default();
        }
        Self {
            num_files: items.len(),
            total_bytes: items.iter().map(|i| i.size).sum(),
            min_bytes: items.iter().map(|i| i.size).min().unwrap_or(0),
            max_bytes: items.iter().map(|i| i.size).max().unwrap_or(0),
        }
    }
}

/// Source or target location descriptor in the job metadata record.
#[derive(Debug, Clone, Serialize)]
pub struct LocationDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The structured document written once per run to the output root.
///
/// Input parameters must already be sanitized by the caller: any
/// parameter a transform marks as sensitive never reaches this record.
#[derive(Debug, Clone, Serialize)]
pub struct JobMetadata {
    pub pipeline: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub job_input_params: serde_json::Value,
    pub size_profile: SizeProfile,
    pub job_output_stats: HashMap<String, u64>,
    pub source: LocationDescriptor,
    pub target: LocationDescriptor,
}

/// Data access contract consumed by the orchestrator and file processor.
///
/// Read/write return the number of internal retries performed; the count
/// is surfaced into statistics as telemetry. A returned error means the
/// retry budget is exhausted.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Enumerate the work set, applying checkpoint filtering, sampling,
    /// and the max-files limit.
    async fn get_files_to_process(&self)
        -> Result<(Vec<WorkItem>, SizeProfile), DataAccessError>;

    /// Read one input file.
    async fn read_file(&self, path: &str) -> Result<(Bytes, u64), DataAccessError>;

    /// Write one output file.
    async fn save_file(&self, path: &str, data: Bytes) -> Result<u64, DataAccessError>;

    /// Derive the output name for an input name and a new extension.
    fn output_name(&self, input_name: &str, extension: &str) -> String;

    /// True if output corresponding to this input name already exists.
    async fn is_checkpointed(&self, input_name: &str) -> Result<bool, DataAccessError>;

    /// Persist the job metadata record to the output root.
    async fn save_job_metadata(&self, metadata: &JobMetadata) -> Result<u64, DataAccessError>;
}

/// Reference-counted data access handle shared by all workers.
pub type DataAccessRef = Arc<dyn DataAccess>;

/// Collapse a work item set to its distinct parent folders.
///
/// Folder transforms consume whole folders; sizes aggregate per folder.
pub fn distinct_folders(items: &[WorkItem]) -> Vec<WorkItem> {
    let mut folders: HashMap<String, u64> = HashMap::new();
    for item in items {
        let folder = match item.path.rfind('/') {
            Some(idx) => item.path[..idx].to_string(),
            None => String::new(),
        };
        *folders.entry(folder).or_insert(0) += item.size;
    }
    let mut out: Vec<WorkItem> = folders
        .into_iter()
        .map(|(path, size)| WorkItem { path, size })
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

/// Storage-backed data access over input and output folders.
pub struct StorageDataAccess {
    input: StorageProviderRef,
    output: StorageProviderRef,
    files_to_use: String,
    checkpoint: bool,
    max_files: i64,
    n_samples: i64,
    retry_limit: u64,
    retry_delay: Duration,
}

impl StorageDataAccess {
    /// Build from run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, DataAccessError> {
        let input = Arc::new(
            StorageProvider::for_url(&config.input.path, &config.input.storage_options)
                .context(ProviderSnafu)?,
        );
        let output = Arc::new(
            StorageProvider::for_url(&config.output.path, &config.output.storage_options)
                .context(ProviderSnafu)?,
        );

        Ok(Self {
            input,
            output,
            files_to_use: config.input.files_to_use.clone(),
            checkpoint: config.output.checkpoint,
            max_files: config.input.max_files,
            n_samples: config.input.n_samples,
            retry_limit: 3,
            retry_delay: Duration::from_millis(250),
        })
    }

    /// Stem of a path with its extension removed, used to match inputs
    /// against already-produced outputs regardless of output extension.
    fn stem(path: &str) -> &str {
        split_extension(path).0
    }

    /// List the output namespace as a set of stems.
    ///
    /// The job metadata record lives in the same namespace but is not a
    /// produced output, so it never marks an input as done.
    async fn output_stems(&self) -> Result<BTreeSet<String>, DataAccessError> {
        let entries = self.output.list_files().await.context(ListFilesSnafu)?;
        Ok(entries
            .iter()
            .filter(|e| e.path != METADATA_FILE)
            .map(|e| Self::stem(&e.path).to_string())
            .collect())
    }

    async fn get_with_retry(
        &self,
        provider: &StorageProvider,
        path: &str,
    ) -> Result<(Bytes, u64), StorageError> {
        let mut retries = 0;
        loop {
            match provider.get(path).await {
                Ok(bytes) => return Ok((bytes, retries)),
                Err(e) if retries < self.retry_limit && !e.is_not_found() => {
                    retries += 1;
                    warn!("Retrying read of {path} (attempt {retries}): {e}");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_with_retry(
        &self,
        provider: &StorageProvider,
        path: &str,
        data: Bytes,
    ) -> Result<u64, StorageError> {
        let mut retries = 0;
        loop {
            match provider.put(path, data.clone()).await {
                Ok(()) => return Ok(retries),
                Err(e) if retries < self.retry_limit => {
                    retries += 1;
                    warn!("Retrying write of {path} (attempt {retries}): {e}");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl DataAccess for StorageDataAccess {
    async fn get_files_to_process(
        &self,
    ) -> Result<(Vec<WorkItem>, SizeProfile), DataAccessError> {
        let entries = self.input.list_files().await.context(ListFilesSnafu)?;
        let mut items: Vec<WorkItem> = entries
            .into_iter()
            .filter(|e| e.path.ends_with(&self.files_to_use))
            .map(|e| WorkItem {
                path: e.path,
                size: e.size,
            })
            .collect();
        let discovered = items.len();

        // Checkpoint set: {inputs} − {already-produced outputs}, computed
        // fresh each run by comparing namespaces.
        if self.checkpoint {
            let produced = self.output_stems().await?;
            items.retain(|item| !produced.contains(Self::stem(&item.path)));
            info!(
                "Checkpointing excluded {} of {} files",
                discovered - items.len(),
                discovered
            );
        }

        if self.n_samples >= 0 {
            let n = (self.n_samples as usize).min(items.len());
            items = items
                .choose_multiple(&mut rand::thread_rng(), n)
                .cloned()
                .collect();
            items.sort_by(|a, b| a.path.cmp(&b.path));
            info!("Sampled {} files out of {}", items.len(), discovered);
        }

        if self.max_files >= 0 {
            items.truncate(self.max_files as usize);
        }

        let profile = SizeProfile::of(&items);
        Ok((items, profile))
    }

    async fn read_file(&self, path: &str) -> Result<(Bytes, u64), DataAccessError> {
        self.get_with_retry(&self.input, path)
            .await
            .map_err(|source| DataAccessError::ReadExhausted {
                path: path.to_string(),
                retries: self.retry_limit,
                source,
            })
    }

    async fn save_file(&self, path: &str, data: Bytes) -> Result<u64, DataAccessError> {
        self.put_with_retry(&self.output, path, data)
            .await
            .map_err(|source| DataAccessError::WriteExhausted {
                path: path.to_string(),
                retries: self.retry_limit,
                source,
            })
    }

    fn output_name(&self, input_name: &str, extension: &str) -> String {
        format!("{}{}", Self::stem(input_name), extension)
    }

    async fn is_checkpointed(&self, input_name: &str) -> Result<bool, DataAccessError> {
        let produced = self.output_stems().await?;
        Ok(produced.contains(Self::stem(input_name)))
    }

    async fn save_job_metadata(&self, metadata: &JobMetadata) -> Result<u64, DataAccessError> {
        let body = serde_json::to_vec_pretty(metadata).context(MetadataSerializeSnafu)?;
        self.save_file(METADATA_FILE, Bytes::from(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, OutputConfig, RuntimeConfig, StageConfig};
    use tempfile::TempDir;

    fn config_for(input: &TempDir, output: &TempDir, checkpoint: bool) -> RunConfig {
        RunConfig {
            input: InputConfig {
                path: input.path().to_str().unwrap().to_string(),
                storage_options: HashMap::new(),
                files_to_use: ".ndjson".to_string(),
                max_files: -1,
                n_samples: -1,
            },
            output: OutputConfig {
                path: output.path().to_str().unwrap().to_string(),
                storage_options: HashMap::new(),
                checkpoint,
            },
            runtime: RuntimeConfig::default(),
            pipeline: vec![StageConfig {
                name: "noop".to_string(),
                params: HashMap::new(),
            }],
        }
    }

    fn write_input(dir: &TempDir, name: &str, content: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_enumeration_filters_extension() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(&input, "a.ndjson", "{}\n");
        write_input(&input, "b.txt", "ignored");

        let da = StorageDataAccess::from_config(&config_for(&input, &output, false)).unwrap();
        let (items, profile) = da.get_files_to_process().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "a.ndjson");
        assert_eq!(profile.num_files, 1);
        assert_eq!(profile.total_bytes, 3);
    }

    #[tokio::test]
    async fn test_checkpoint_excludes_produced_outputs() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(&input, "a.ndjson", "{}\n");
        write_input(&input, "b.ndjson", "{}\n");
        // a already has output, with a different extension.
        std::fs::write(output.path().join("a.parquet"), "done").unwrap();

        let da = StorageDataAccess::from_config(&config_for(&input, &output, true)).unwrap();
        let (items, _) = da.get_files_to_process().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "b.ndjson");
        assert!(da.is_checkpointed("a.ndjson").await.unwrap());
        assert!(!da.is_checkpointed("b.ndjson").await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_record_does_not_checkpoint_inputs() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        // An input whose stem matches the metadata record's.
        write_input(&input, "metadata.ndjson", "{}\n");
        std::fs::write(output.path().join(METADATA_FILE), "{}").unwrap();

        let da = StorageDataAccess::from_config(&config_for(&input, &output, true)).unwrap();
        let (items, _) = da.get_files_to_process().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "metadata.ndjson");
        assert!(!da.is_checkpointed("metadata.ndjson").await.unwrap());
    }

    #[tokio::test]
    async fn test_max_files_truncates() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for i in 0..5 {
            write_input(&input, &format!("f{i}.ndjson"), "{}\n");
        }

        let mut config = config_for(&input, &output, false);
        config.input.max_files = 2;
        let da = StorageDataAccess::from_config(&config).unwrap();
        let (items, _) = da.get_files_to_process().await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_sampling_limits_count() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for i in 0..10 {
            write_input(&input, &format!("f{i}.ndjson"), "{}\n");
        }

        let mut config = config_for(&input, &output, false);
        config.input.n_samples = 3;
        let da = StorageDataAccess::from_config(&config).unwrap();
        let (items, _) = da.get_files_to_process().await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(&input, "a.ndjson", "{\"id\":1}\n");

        let da = StorageDataAccess::from_config(&config_for(&input, &output, false)).unwrap();
        let (bytes, retries) = da.read_file("a.ndjson").await.unwrap();
        assert_eq!(retries, 0);

        let retries = da.save_file("a.ndjson", bytes).await.unwrap();
        assert_eq!(retries, 0);
        assert!(output.path().join("a.ndjson").exists());
    }

    #[test]
    fn test_output_name_rewrites_extension() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let da = StorageDataAccess::from_config(&config_for(&input, &output, false)).unwrap();
        assert_eq!(da.output_name("sub/a.parquet", ".ndjson"), "sub/a.ndjson");
    }

    #[test]
    fn test_distinct_folders() {
        let items = vec![
            WorkItem {
                path: "a/one.parquet".to_string(),
                size: 10,
            },
            WorkItem {
                path: "a/two.parquet".to_string(),
                size: 20,
            },
            WorkItem {
                path: "b/three.parquet".to_string(),
                size: 5,
            },
        ];
        let folders = distinct_folders(&items);
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0], WorkItem { path: "a".to_string(), size: 30 });
        assert_eq!(folders[1], WorkItem { path: "b".to_string(), size: 5 });
    }

    #[test]
    fn test_size_profile() {
        let items = vec![
            WorkItem {
                path: "a".to_string(),
                size: 125,
            },
            WorkItem {
                path: "b".to_string(),
                size: 1000,
            },
        ];
        let profile = SizeProfile::of(&items);
        assert_eq!(profile.num_files, 2);
        assert_eq!(profile.total_bytes, 1125);
        assert_eq!(profile.min_bytes, 125);
        assert_eq!(profile.max_bytes, 1000);
    }
}
