//! Scoring artifact manifest and loader.
//!
//! The training job exports one JSON manifest per model version holding the
//! feature ordering it was fitted on, the standard-scaler parameters and the
//! classifier itself (or a pointer to an ONNX file next to the manifest).

use crate::error::ArtifactError;
use crate::features::FEATURE_COUNT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Immutable trained model plus its preprocessing contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringArtifact {
    /// Free-form model version label
    #[serde(default)]
    pub version: String,
    /// Feature names in the order the model was fitted with
    pub feature_order: Vec<String>,
    /// Per-feature standardization fitted on the training set
    pub scaler: Scaler,
    /// Classifier definition
    pub model: ModelSpec,
}

/// Standard scaler parameters: `(x - mean) / scale`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    /// Scaler that leaves values unchanged
    pub fn identity(len: usize) -> Self {
        Self {
            mean: vec![0.0; len],
            scale: vec![1.0; len],
        }
    }

    /// Standardize a raw feature row. Zero-variance features keep scale 1.
    pub fn transform(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (&mean, &scale))| {
                let scale = if scale == 0.0 { 1.0 } else { scale };
                (x - mean) / scale
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        if self.mean.len() != FEATURE_COUNT || self.scale.len() != FEATURE_COUNT {
            return Err(ArtifactError::Invalid(format!(
                "scaler has {} means and {} scales, expected {}",
                self.mean.len(),
                self.scale.len(),
                FEATURE_COUNT
            )));
        }
        if self
            .mean
            .iter()
            .chain(&self.scale)
            .any(|v| !v.is_finite())
        {
            return Err(ArtifactError::Invalid(
                "scaler contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classifier exported by the training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSpec {
    /// Logistic regression: `sigmoid(weights · x + intercept)`
    Logistic { weights: Vec<f64>, intercept: f64 },
    /// Random forest; probability is the mean leaf value across trees
    Forest { trees: Vec<TreeSpec> },
    /// ONNX model file, relative paths resolve against the manifest directory
    Onnx { path: PathBuf },
}

impl ModelSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelSpec::Logistic { .. } => "logistic",
            ModelSpec::Forest { .. } => "forest",
            ModelSpec::Onnx { .. } => "onnx",
        }
    }
}

/// One decision tree in flattened array form.
///
/// `left[i]`/`right[i]` are child node indices, `-1` marks a leaf.
/// `value[i]` is the fraud-class fraction of the training samples at node `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSpec {
    pub left: Vec<i64>,
    pub right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl ScoringArtifact {
    /// Read and parse a manifest from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let location = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: location.clone(),
            source,
        })?;
        let artifact: Self = serde_json::from_str(&raw).map_err(|source| ArtifactError::Parse {
            path: location.clone(),
            source,
        })?;

        info!(
            path = %location,
            version = %artifact.version,
            model = artifact.model.kind(),
            features = artifact.feature_order.len(),
            "Scoring artifact loaded"
        );
        Ok(artifact)
    }

    /// Check the declared feature order against the encoder schema, then the
    /// internal consistency of scaler and model.
    pub fn validate(&self, expected_features: &[&str]) -> Result<(), ArtifactError> {
        let matches = self.feature_order.len() == expected_features.len()
            && self
                .feature_order
                .iter()
                .zip(expected_features)
                .all(|(found, expected)| found == expected);
        if !matches {
            return Err(ArtifactError::SchemaMismatch {
                expected: expected_features.iter().map(|s| s.to_string()).collect(),
                found: self.feature_order.clone(),
            });
        }

        self.scaler.validate()?;

        match &self.model {
            ModelSpec::Logistic { weights, intercept } => {
                if weights.len() != FEATURE_COUNT {
                    return Err(ArtifactError::Invalid(format!(
                        "logistic model has {} weights, expected {}",
                        weights.len(),
                        FEATURE_COUNT
                    )));
                }
                if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                    return Err(ArtifactError::Invalid(
                        "logistic model contains non-finite coefficients".to_string(),
                    ));
                }
            }
            ModelSpec::Forest { trees } => {
                if trees.is_empty() {
                    return Err(ArtifactError::Invalid("forest has no trees".to_string()));
                }
                for (i, tree) in trees.iter().enumerate() {
                    tree.validate()
                        .map_err(|reason| ArtifactError::Invalid(format!("tree {i}: {reason}")))?;
                }
            }
            ModelSpec::Onnx { .. } => {}
        }
        Ok(())
    }
}

impl TreeSpec {
    fn validate(&self) -> Result<(), String> {
        let n = self.left.len();
        if n == 0 {
            return Err("empty tree".to_string());
        }
        if [
            self.right.len(),
            self.feature.len(),
            self.threshold.len(),
            self.value.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err("node arrays have different lengths".to_string());
        }

        for node in 0..n {
            let (left, right) = (self.left[node], self.right[node]);
            if left == -1 && right == -1 {
                let value = self.value[node];
                if !(0.0..=1.0).contains(&value) {
                    return Err(format!("leaf {node} value {value} outside [0, 1]"));
                }
                continue;
            }
            // Children always come after their parent, which rules out cycles
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(format!("node {node} has invalid child {child}"));
                }
            }
            let feature = self.feature[node];
            if feature < 0 || feature >= FEATURE_COUNT as i64 {
                return Err(format!("node {node} splits on unknown feature {feature}"));
            }
            if self.threshold[node].is_nan() {
                return Err(format!("node {node} has NaN threshold"));
            }
        }
        Ok(())
    }
}
