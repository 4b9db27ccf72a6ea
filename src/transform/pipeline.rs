//! Sequential pipeline composition.
//!
//! Composes an ordered list of transforms into one transform: outputs of
//! stage `i` become inputs of stage `i+1`, metrics merge by addition, and
//! buffered ("flush") output of an earlier stage is routed through every
//! remaining stage exactly once at end-of-stream. Data passes between
//! stages in memory; nothing is written until the whole chain has run.

use bytes::Bytes;

use super::{
    merge_metrics, split_extension, BinaryTransform, ByteUnit, Metrics, TransformResult,
};
use crate::error::{ConfigError, TransformError};

/// One participating stage: a named binary-capable transform.
pub struct Stage {
    pub name: String,
    pub transform: Box<dyn BinaryTransform>,
}

impl Stage {
    pub fn new(name: impl Into<String>, transform: Box<dyn BinaryTransform>) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

/// A pipeline of transforms executed sequentially per work item.
///
/// Itself a `BinaryTransform`, so a pipeline can be driven by the file
/// processor exactly like a single-stage transform.
pub struct PipelineTransform {
    participants: Vec<Stage>,
    /// Name of the most recent input, used to name flush-produced data
    /// fed back through the chain.
    file_name: String,
}

impl std::fmt::Debug for PipelineTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTransform")
            .field(
                "participants",
                &self.participants.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl PipelineTransform {
    /// Build a pipeline from an ordered stage list.
    ///
    /// Constructing with zero stages is a fatal configuration error: a
    /// partial pipeline must never be produced silently.
    pub fn new(participants: Vec<Stage>) -> Result<Self, ConfigError> {
        if participants.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        Ok(Self {
            participants,
            file_name: String::new(),
        })
    }

    pub fn num_stages(&self) -> usize {
        self.participants.len()
    }

    /// Run one stage over every `(bytes, name)` pair currently in flight.
    ///
    /// Each output is renamed to `stem-of-input + output-extension`, so
    /// names remain traceable through the chain.
    fn process_stage(
        stage: &mut Stage,
        data: Vec<ByteUnit>,
        metrics: &mut Metrics,
    ) -> Result<Vec<ByteUnit>, TransformError> {
        let mut out = Vec::new();
        for unit in data {
            let (stem, _) = split_extension(&unit.name);
            let result = stage.transform.transform(&unit.name, unit.content)?;
            for produced in result.outputs {
                out.push(ByteUnit::new(
                    format!("{stem}{}", produced.name),
                    produced.content,
                ));
            }
            merge_metrics(metrics, &result.metrics);
        }
        Ok(out)
    }

    /// Rewrite each surviving unit's name to its final extension.
    ///
    /// Pipeline outputs follow the binary contract: names are the
    /// extension the caller should append to the input's stem.
    fn convert_output(data: Vec<ByteUnit>) -> Vec<ByteUnit> {
        data.into_iter()
            .map(|unit| {
                let (_, ext) = split_extension(&unit.name);
                ByteUnit::new(ext.to_string(), unit.content)
            })
            .collect()
    }
}

impl BinaryTransform for PipelineTransform {
    fn transform(
        &mut self,
        file_name: &str,
        content: Bytes,
    ) -> Result<TransformResult, TransformError> {
        self.file_name = file_name.to_string();
        let mut data = vec![ByteUnit::new(file_name.to_string(), content)];
        let mut metrics = Metrics::new();

        for stage in &mut self.participants {
            data = Self::process_stage(stage, data, &mut metrics)?;
            if data.is_empty() {
                // A stage filtering out the item legitimately stops the
                // chain; metrics accumulated so far still count.
                return Ok(TransformResult {
                    outputs: vec![],
                    metrics,
                });
            }
        }

        Ok(TransformResult {
            outputs: Self::convert_output(data),
            metrics,
        })
    }

    fn flush(&mut self) -> Result<TransformResult, TransformError> {
        let mut outputs = Vec::new();
        let mut metrics = Metrics::new();
        let last = self.participants.len() - 1;

        for i in 0..self.participants.len() {
            let flushed = self.participants[i].transform.flush()?;
            merge_metrics(&mut metrics, &flushed.metrics);

            if !flushed.outputs.is_empty() && i < last {
                // Only a downstream stage can consume buffered output, and
                // only once, at end-of-stream: run it through the rest of
                // the chain.
                let mut data: Vec<ByteUnit> = flushed
                    .outputs
                    .into_iter()
                    .map(|unit| ByteUnit::new(self.file_name.clone(), unit.content))
                    .collect();

                for stage in &mut self.participants[i + 1..] {
                    data = Self::process_stage(stage, data, &mut metrics)?;
                    if data.is_empty() {
                        break;
                    }
                }
                outputs.extend(Self::convert_output(data));
            } else {
                outputs.extend(flushed.outputs);
            }
        }

        Ok(TransformResult { outputs, metrics })
    }
}
