//! Type definitions for the ledger fraud monitor

pub mod alert;
pub mod transaction;

pub use alert::{FraudAlert, RiskLevel, RiskLevelThresholds};
pub use transaction::Transaction;
