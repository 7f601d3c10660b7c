//! Fraud scorer: scaling plus classifier, loaded once at startup.

use crate::error::{ArtifactError, ScoreError};
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::models::artifact::{ModelSpec, Scaler, ScoringArtifact};
use crate::models::classifier::{Classifier, ForestModel, LogisticModel};
use std::path::Path;
use tracing::{debug, info};

/// Probabilities above this are the classifier's own positive label.
const LABEL_CUTOFF: f64 = 0.5;

/// Outcome of scoring one feature vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringResult {
    /// Fraud probability in [0, 1]
    pub probability: f64,
    /// Classifier label, independent of the flag threshold
    pub predicted_label: bool,
}

/// Immutable scoring artifact wrapped for inference.
///
/// `score` takes `&self` and touches no shared mutable state besides the
/// ONNX session lock, so the scorer can be shared behind an `Arc`.
pub struct FraudScorer {
    version: String,
    scaler: Scaler,
    classifier: Box<dyn Classifier>,
}

impl FraudScorer {
    /// Load and validate the artifact at `path`.
    ///
    /// Schema and model checks all happen here, so a bad artifact stops the
    /// process before any transaction is read.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let artifact = ScoringArtifact::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_artifact(artifact, base_dir)
    }

    /// Build from an already parsed artifact. Relative model paths resolve
    /// against `base_dir`.
    pub fn from_artifact(artifact: ScoringArtifact, base_dir: &Path) -> Result<Self, ArtifactError> {
        artifact.validate(&FEATURE_NAMES)?;

        let ScoringArtifact {
            version,
            scaler,
            model,
            ..
        } = artifact;

        let classifier: Box<dyn Classifier> = match model {
            ModelSpec::Logistic { weights, intercept } => {
                Box::new(LogisticModel::new(weights, intercept))
            }
            ModelSpec::Forest { trees } => Box::new(ForestModel::new(trees)),
            ModelSpec::Onnx { path } => load_onnx(&base_dir.join(path))?,
        };

        info!(
            version = %version,
            model = classifier.name(),
            features = FEATURE_NAMES.len(),
            "Fraud scorer initialized"
        );

        Ok(Self {
            version,
            scaler,
            classifier,
        })
    }

    /// Scale the vector with the fitted parameters and score it.
    pub fn score(&self, features: &FeatureVector) -> Result<ScoringResult, ScoreError> {
        let scaled = self.scaler.transform(&features.to_array());
        let probability = self.classifier.predict_proba(&scaled)?;

        if !(0.0..=1.0).contains(&probability) {
            return Err(ScoreError::InvalidProbability(probability));
        }

        debug!(probability = probability, model = self.classifier.name(), "Scored");

        Ok(ScoringResult {
            probability,
            predicted_label: probability > LABEL_CUTOFF,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model_name(&self) -> &'static str {
        self.classifier.name()
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path) -> Result<Box<dyn Classifier>, ArtifactError> {
    Ok(Box::new(crate::models::onnx::OnnxModel::load(path, 1)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path) -> Result<Box<dyn Classifier>, ArtifactError> {
    Err(ArtifactError::Invalid(format!(
        "{} is an ONNX model but this build lacks the `onnx` feature",
        path.display()
    )))
}
