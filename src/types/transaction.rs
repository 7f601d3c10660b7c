//! Ledger transaction record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transaction as stored on the ledger.
///
/// Everything except `is_flagged` and `ml_confidence` is immutable once
/// appended. Those two are written at most once, by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sequential ledger id, starting at 1
    pub id: u64,

    /// Sending address
    pub sender: String,

    /// Receiving address
    pub receiver: String,

    /// Transferred amount
    pub amount: f64,

    /// Unix seconds at which the transaction was appended
    pub timestamp: i64,

    /// Set once the monitor has flagged the transaction
    #[serde(default)]
    pub is_flagged: bool,

    /// Fraud probability written together with the flag
    #[serde(default)]
    pub ml_confidence: Option<f64>,
}

impl Transaction {
    /// Create a new unflagged transaction
    pub fn new(id: u64, sender: &str, receiver: &str, amount: f64, timestamp: i64) -> Self {
        Self {
            id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp,
            is_flagged: false,
            ml_confidence: None,
        }
    }

    /// Timestamp as a UTC datetime, `None` when out of the representable range
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}
