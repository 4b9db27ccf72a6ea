//! Transform registry.
//!
//! Maps configuration identifiers to transform constructors, resolved at
//! startup. Each worker builds its own transform instances through the
//! registry, so no transform state is ever shared across workers.

use std::collections::HashMap;
use std::sync::Arc;

use super::pipeline::{PipelineTransform, Stage};
use super::{BinaryTransform, TransformVariant};
use crate::config::StageConfig;
use crate::error::ConfigError;
use crate::transforms;

/// Parameters of one configured stage.
pub type StageParams = HashMap<String, serde_yaml::Value>;

type Factory =
    Box<dyn Fn(&StageParams) -> Result<TransformVariant, ConfigError> + Send + Sync>;

/// A registered transform: its constructor plus metadata.
struct Entry {
    factory: Factory,
    /// Parameter keys excluded from the job metadata record (secrets,
    /// access keys and the like).
    sensitive: Vec<String>,
}

/// Registry of transform constructors, keyed by configuration name.
#[derive(Default)]
pub struct TransformRegistry {
    entries: HashMap<String, Entry>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in transforms registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        transforms::register_builtins(&mut registry);
        registry
    }

    /// Register a transform constructor under a configuration name.
    pub fn register<F>(&mut self, name: &str, sensitive: &[&str], factory: F)
    where
        F: Fn(&StageParams) -> Result<TransformVariant, ConfigError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Entry {
                factory: Box::new(factory),
                sensitive: sensitive.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// True if a transform is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Construct a fresh transform instance for a configured stage.
    pub fn build(&self, stage: &StageConfig) -> Result<TransformVariant, ConfigError> {
        let entry = self
            .entries
            .get(&stage.name)
            .ok_or_else(|| ConfigError::UnknownTransform {
                name: stage.name.clone(),
            })?;
        (entry.factory)(&stage.params)
    }

    /// Parameter keys a transform marked as sensitive.
    pub fn sensitive_params(&self, name: &str) -> &[String] {
        self.entries
            .get(name)
            .map(|e| e.sensitive.as_slice())
            .unwrap_or(&[])
    }
}

/// Build the per-worker transform for a configured stage list.
///
/// Binary and table stages compose into a [`PipelineTransform`]; a folder
/// transform can only stand alone, since folder units have no per-file
/// contract for a downstream stage to consume.
pub fn build_worker_transform(
    registry: &Arc<TransformRegistry>,
    stages: &[StageConfig],
) -> Result<TransformVariant, ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::EmptyPipeline);
    }

    let mut participants: Vec<Stage> = Vec::with_capacity(stages.len());
    for stage_config in stages {
        match registry.build(stage_config)? {
            variant @ TransformVariant::Folder(_) => {
                if stages.len() > 1 {
                    return Err(ConfigError::FolderInPipeline {
                        name: stage_config.name.clone(),
                    });
                }
                return Ok(variant);
            }
            variant => {
                if let Some(transform) = variant.into_binary() {
                    participants.push(Stage::new(stage_config.name.clone(), transform));
                }
            }
        }
    }

    let pipeline = PipelineTransform::new(participants)?;
    Ok(TransformVariant::Binary(
        Box::new(pipeline) as Box<dyn BinaryTransform>
    ))
}

/// Read an optional unsigned-integer parameter.
pub fn param_u64(
    params: &StageParams,
    transform: &str,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidParameter {
                name: transform.to_string(),
                param: key.to_string(),
                message: format!("expected a non-negative integer, got {value:?}"),
            }),
    }
}
