//! Ledger Fraud Monitor Library
//!
//! Watches an append-only transaction ledger, scores each new transaction
//! with a pre-trained classifier and writes a fraud flag back to the ledger
//! when the probability crosses the configured threshold.

pub mod config;
pub mod error;
pub mod features;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod policy;
pub mod producer;
pub mod types;

pub use config::AppConfig;
pub use error::{ArtifactError, CursorError, EncodeError, LedgerError, MonitorError, ScoreError};
pub use features::{FeatureEncoder, FeatureVector, FrequencyTable};
pub use ledger::{Ledger, MemoryLedger, NatsLedger};
pub use models::{FraudScorer, ScoringResult};
pub use monitor::{LedgerCursor, MonitorLoop, MonitorSettings};
pub use policy::{Action, DecisionPolicy, RunningStats};
pub use producer::{AlertProducer, AlertSink};
pub use types::{alert::FraudAlert, transaction::Transaction};
