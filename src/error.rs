//! Error taxonomy for the monitoring pipeline.
//!
//! Each stage has its own error type. The monitor decides what is transient
//! (retry with backoff), what is per-record (skip and advance) and what is
//! fatal (stop and report to the caller).

use thiserror::Error;

/// Record-level failure while turning a transaction into features.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("malformed record {id}: {reason}")]
    MalformedRecord { id: u64, reason: String },
}

/// Failure loading or validating the scoring artifact. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("feature schema mismatch: encoder expects {expected:?}, artifact declares {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("invalid artifact: {0}")]
    Invalid(String),
}

/// The classifier could not produce a usable probability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("model inference failed: {0}")]
    Inference(String),
    #[error("model returned invalid probability {0}")]
    InvalidProbability(f64),
}

/// Failure talking to the ledger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("transaction {0} not found")]
    NotFound(u64),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger request timed out after {0} ms")]
    Timeout(u64),
    #[error("ledger rejected request: {0}")]
    Rejected(String),
    #[error("unexpected ledger response: {0}")]
    Protocol(String),
}

impl LedgerError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Unavailable(_) | LedgerError::Timeout(_) | LedgerError::NotFound(_)
        )
    }
}

/// The cursor was asked to move backwards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor invariant violated: last processed id is {current}, requested {requested}")]
    InvariantViolation { current: u64, requested: u64 },
}

/// Fatal conditions that stop the monitor loop.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Invariant(#[from] CursorError),
    #[error("ledger unhealthy after {consecutive_failures} consecutive failures: {last_error}")]
    Unhealthy {
        consecutive_failures: u32,
        last_error: LedgerError,
    },
    #[error(transparent)]
    Scoring(#[from] ScoreError),
}
