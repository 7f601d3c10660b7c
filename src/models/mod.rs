//! Fraud scoring model components

pub mod artifact;
pub mod classifier;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod scorer;

pub use artifact::{ModelSpec, Scaler, ScoringArtifact, TreeSpec};
pub use classifier::{Classifier, ForestModel, LogisticModel};
pub use scorer::{FraudScorer, ScoringResult};
