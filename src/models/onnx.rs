//! ONNX Runtime backed classifier (cargo feature `onnx`).

use crate::error::{ArtifactError, ScoreError};
use crate::models::classifier::Classifier;
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Loaded ONNX model. The session is behind a mutex because running it
/// needs exclusive access.
pub struct OnnxModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    /// Load an exported classifier from file
    pub fn load(path: &Path, threads: usize) -> Result<Self, ArtifactError> {
        let invalid = |e: ort::Error| ArtifactError::Invalid(format!("{}: {e}", path.display()));

        ort::init().commit().map_err(invalid)?;

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(invalid)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            "ONNX model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn run(&self, scaled: &[f64]) -> Result<f64, ScoreError> {
        let inference = |e: ort::Error| ScoreError::Inference(e.to_string());

        let row: Vec<f32> = scaled.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, row.len() as i64];
        let input = Tensor::from_array((shape, row)).map_err(inference)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ScoreError::Inference(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference)?;

        self.extract_probability(&outputs)
    }

    /// Fraud probability from either a `[batch, classes]` tensor or the
    /// `seq(map(int64, float))` layout some exporters emit.
    fn extract_probability(&self, outputs: &SessionOutputs) -> Result<f64, ScoreError> {
        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ScoreError::Inference(format!("missing output {}", self.output_name))
        })?;

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let classes = shape.last().copied().unwrap_or(1);
            let prob = if classes >= 2 { data.get(1) } else { data.first() };
            return prob
                .map(|&p| f64::from(p))
                .ok_or_else(|| ScoreError::Inference("empty probability tensor".to_string()));
        }

        if DynSequenceValueType::can_downcast(&output.dtype()) {
            return extract_from_sequence_map(output);
        }

        Err(ScoreError::Inference(format!(
            "unsupported output layout for {}",
            self.output_name
        )))
    }
}

fn extract_from_sequence_map(output: &DynValue) -> Result<f64, ScoreError> {
    let inference = |e: ort::Error| ScoreError::Inference(e.to_string());
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(inference)?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(inference)?;
    let first = maps
        .first()
        .ok_or_else(|| ScoreError::Inference("empty output sequence".to_string()))?;
    let pairs = first.try_extract_key_values::<i64, f32>().map_err(inference)?;

    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 1) {
        return Ok(f64::from(*p));
    }
    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 0) {
        return Ok(1.0 - f64::from(*p));
    }
    debug!(classes = pairs.len(), "No class probability in output map");
    Err(ScoreError::Inference("no class probability in output map".to_string()))
}

impl Classifier for OnnxModel {
    fn predict_proba(&self, scaled: &[f64]) -> Result<f64, ScoreError> {
        self.run(scaled)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
