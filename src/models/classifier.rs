//! Classifiers evaluated in-process from the artifact manifest.

use crate::error::ScoreError;
use crate::models::artifact::TreeSpec;

/// Maps a scaled feature row to a fraud probability.
///
/// Implementations are read-only after construction so a single instance can
/// be shared across concurrent scoring calls.
pub trait Classifier: Send + Sync {
    /// Probability of the fraud class for one scaled row.
    fn predict_proba(&self, scaled: &[f64]) -> Result<f64, ScoreError>;

    /// Short model family name for logs.
    fn name(&self) -> &'static str;
}

/// Logistic regression.
pub struct LogisticModel {
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticModel {
    pub fn new(weights: Vec<f64>, intercept: f64) -> Self {
        Self { weights, intercept }
    }
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, scaled: &[f64]) -> Result<f64, ScoreError> {
        let z = self.intercept
            + self
                .weights
                .iter()
                .zip(scaled)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        Ok(sigmoid(z))
    }

    fn name(&self) -> &'static str {
        "logistic"
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Random forest: average of per-tree leaf fraud fractions.
pub struct ForestModel {
    trees: Vec<TreeSpec>,
}

impl ForestModel {
    /// Trees must already be validated (children after parents, known features).
    pub fn new(trees: Vec<TreeSpec>) -> Self {
        Self { trees }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn leaf_value(tree: &TreeSpec, scaled: &[f64]) -> f64 {
        let mut node = 0usize;
        while tree.left[node] != -1 {
            let feature = tree.feature[node] as usize;
            // Trees were fitted on float32 inputs, compare at the same precision
            let x = f64::from(scaled[feature] as f32);
            node = if x <= tree.threshold[node] {
                tree.left[node] as usize
            } else {
                tree.right[node] as usize
            };
        }
        tree.value[node]
    }
}

impl Classifier for ForestModel {
    fn predict_proba(&self, scaled: &[f64]) -> Result<f64, ScoreError> {
        if self.trees.is_empty() {
            return Err(ScoreError::Inference("forest has no trees".to_string()));
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| Self::leaf_value(tree, scaled))
            .sum();
        Ok(total / self.trees.len() as f64)
    }

    fn name(&self) -> &'static str {
        "forest"
    }
}
