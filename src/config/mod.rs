//! Run configuration parsing and validation.
//!
//! Handles loading a run configuration from a YAML file: input/output
//! locations, worker pool sizing, checkpoint and enumeration knobs, and
//! the ordered pipeline stage list.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyInputPathSnafu, EmptyOutputPathSnafu, EmptyPipelineSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroPoolSizeSnafu,
};

/// Main configuration structure for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    /// Worker pool configuration (optional, sensible defaults).
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Ordered pipeline stage list. Stages execute in the order given.
    pub pipeline: Vec<StageConfig>,
}

/// Input folder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Input folder URL. Examples: "s3://bucket/input", "/local/input"
    pub path: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// File extension of files to process (default: ".parquet").
    #[serde(default = "default_files_to_use")]
    pub files_to_use: String,

    /// Maximum number of files to process; negative means unlimited.
    #[serde(default = "default_max_files")]
    pub max_files: i64,

    /// Randomly sample this many files from the candidate set; negative
    /// disables sampling.
    #[serde(default = "default_max_files")]
    pub n_samples: i64,
}

/// Output folder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output folder URL. Examples: "s3://bucket/output", "/local/output"
    pub path: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Skip inputs whose output already exists (default: false).
    #[serde(default)]
    pub checkpoint: bool,
}

/// Worker pool and progress-reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of workers in the pool (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Delay in milliseconds between worker startups (default: 0).
    #[serde(default)]
    pub creation_delay_ms: u64,

    /// Seconds to wait for workers to become ready (default: 120).
    #[serde(default = "default_startup_window_secs")]
    pub startup_window_secs: u64,

    /// Log a progress line every this many completions (default: 10).
    #[serde(default = "default_print_interval")]
    pub print_interval: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            creation_delay_ms: 0,
            startup_window_secs: default_startup_window_secs(),
            print_interval: default_print_interval(),
        }
    }
}

/// One pipeline stage: a registered transform name plus its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Registered transform name, e.g. "noop" or "resize".
    pub name: String,

    /// Transform-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, serde_yaml::Value>,
}

fn default_files_to_use() -> String {
    ".parquet".to_string()
}

fn default_max_files() -> i64 {
    -1
}

fn default_pool_size() -> usize {
    4
}

fn default_startup_window_secs() -> u64 {
    120
}

fn default_print_interval() -> usize {
    10
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        let config: RunConfig = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Any failure here is fatal: a run never starts with a partially
    /// valid configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.input.path.is_empty(), EmptyInputPathSnafu);
        ensure!(!self.output.path.is_empty(), EmptyOutputPathSnafu);
        ensure!(!self.pipeline.is_empty(), EmptyPipelineSnafu);
        ensure!(self.runtime.pool_size >= 1, ZeroPoolSizeSnafu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
input:
  path: "/data/input"

output:
  path: "/data/output"
  checkpoint: true

pipeline:
  - name: resize
    params:
      max_rows_per_table: 125
"#
    }

    #[test]
    fn test_config_yaml_parsing() {
        let config: RunConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.input.path, "/data/input");
        assert!(config.output.checkpoint);
        assert_eq!(config.pipeline.len(), 1);
        assert_eq!(config.pipeline[0].name, "resize");
        assert_eq!(
            config.pipeline[0].params["max_rows_per_table"],
            serde_yaml::Value::from(125)
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: RunConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.runtime.pool_size, 4);
        assert_eq!(config.runtime.print_interval, 10);
        assert_eq!(config.input.files_to_use, ".parquet");
        assert_eq!(config.input.max_files, -1);
        assert_eq!(config.input.n_samples, -1);
    }

    #[test]
    fn test_empty_pipeline_is_fatal() {
        let yaml = r#"
input:
  path: "/data/input"
output:
  path: "/data/output"
pipeline: []
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPipeline));
    }

    #[test]
    fn test_zero_pool_size_is_fatal() {
        let yaml = r#"
input:
  path: "/data/input"
output:
  path: "/data/output"
runtime:
  pool_size: 0
pipeline:
  - name: noop
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ZeroPoolSize
        ));
    }
}
