//! Fraud alert data structures

use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Lower bounds of the alert risk levels; anything below `medium` is low
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.6,
            high: 0.8,
            critical: 0.95,
        }
    }
}

/// Alert published after a transaction has been flagged on the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: Uuid,

    /// Flagged ledger transaction
    pub transaction_id: u64,

    /// Fraud probability written to the ledger
    pub confidence: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    pub sender: String,
    pub receiver: String,
    pub amount: f64,

    /// Ledger timestamp of the transaction (unix seconds)
    pub timestamp: i64,

    /// When the monitor flagged it
    pub flagged_at: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert for a flagged transaction
    pub fn new(tx: &Transaction, confidence: f64, thresholds: &RiskLevelThresholds) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            transaction_id: tx.id,
            confidence,
            risk_level: RiskLevel::from_score(confidence, thresholds),
            sender: tx.sender.clone(),
            receiver: tx.receiver.clone(),
            amount: tx.amount,
            timestamp: tx.timestamp,
            flagged_at: Utc::now(),
        }
    }
}
