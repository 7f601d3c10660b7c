//! Feature engineering for fraud scoring.
//!
//! Turns a ledger transaction into the fixed 11-field vector the classifier
//! was trained on. Field order is part of the model contract and is checked
//! against the scoring artifact at startup.

pub mod frequency;
pub mod hash;

use crate::config::{DetectionConfig, DEFAULT_HIGH_AMOUNT_THRESHOLD};
use crate::error::EncodeError;
use crate::types::transaction::Transaction;
use anyhow::{Context, Result};
use chrono::{Datelike, FixedOffset, Offset, Timelike, Utc};

pub use frequency::{ContextStats, FrequencyTable};
pub use hash::address_hash;

/// Number of model input features.
pub const FEATURE_COUNT: usize = 11;

/// Feature names in model input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount",
    "amount_log",
    "is_high_amount",
    "hour",
    "is_unusual_hour",
    "day_of_week",
    "sender_frequency",
    "receiver_frequency",
    "amount_hour_interaction",
    "sender_hash",
    "receiver_hash",
];

/// First hour considered business hours (inclusive)
pub const BUSINESS_HOURS_START: u32 = 9;
/// Last hour considered business hours (inclusive)
pub const BUSINESS_HOURS_END: u32 = 17;

/// Engineered features of one transaction, before scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub amount: f64,
    pub amount_log: f64,
    pub is_high_amount: f64,
    pub hour: f64,
    pub is_unusual_hour: f64,
    pub day_of_week: f64,
    pub sender_frequency: f64,
    pub receiver_frequency: f64,
    pub amount_hour_interaction: f64,
    pub sender_hash: f64,
    pub receiver_hash: f64,
}

impl FeatureVector {
    /// Values in `FEATURE_NAMES` order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.amount,
            self.amount_log,
            self.is_high_amount,
            self.hour,
            self.is_unusual_hour,
            self.day_of_week,
            self.sender_frequency,
            self.receiver_frequency,
            self.amount_hour_interaction,
            self.sender_hash,
            self.receiver_hash,
        ]
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.to_array()[i])
    }
}

/// Transforms ledger transactions into model input features.
///
/// Only per-record fields and the supplied context statistics are used, so
/// the same transaction and context always produce the same vector.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    high_amount_threshold: f64,
    frequency_floor: u64,
    offset: FixedOffset,
}

impl FeatureEncoder {
    /// Encoder with the training defaults (8000 high-amount cut, floor 1, UTC).
    pub fn new() -> Self {
        Self {
            high_amount_threshold: DEFAULT_HIGH_AMOUNT_THRESHOLD,
            frequency_floor: 1,
            offset: utc(),
        }
    }

    /// Encoder configured from the detection section.
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_seconds).with_context(|| {
            format!(
                "detection.utc_offset_seconds out of range: {}",
                config.utc_offset_seconds
            )
        })?;
        Ok(Self {
            high_amount_threshold: config.high_amount_threshold,
            frequency_floor: config.frequency_floor,
            offset,
        })
    }

    pub fn with_high_amount_threshold(mut self, threshold: f64) -> Self {
        self.high_amount_threshold = threshold;
        self
    }

    pub fn with_frequency_floor(mut self, floor: u64) -> Self {
        self.frequency_floor = floor;
        self
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Encode a transaction against the given frequency context.
    pub fn encode<C: ContextStats + ?Sized>(
        &self,
        tx: &Transaction,
        context: &C,
    ) -> Result<FeatureVector, EncodeError> {
        self.validate(tx)?;

        let local = tx
            .datetime()
            .ok_or_else(|| malformed(tx, format!("timestamp {} out of range", tx.timestamp)))?
            .with_timezone(&self.offset);

        let amount = tx.amount;
        let hour = local.hour();
        let is_unusual_hour = !(BUSINESS_HOURS_START..=BUSINESS_HOURS_END).contains(&hour);
        let sender_frequency = context.sender_count(&tx.sender).max(self.frequency_floor);
        let receiver_frequency = context.receiver_count(&tx.receiver).max(self.frequency_floor);

        let features = FeatureVector {
            amount,
            amount_log: amount.ln_1p(),
            is_high_amount: flag(amount > self.high_amount_threshold),
            hour: f64::from(hour),
            is_unusual_hour: flag(is_unusual_hour),
            day_of_week: f64::from(local.weekday().num_days_from_monday()),
            sender_frequency: sender_frequency as f64,
            receiver_frequency: receiver_frequency as f64,
            amount_hour_interaction: amount * f64::from(hour),
            sender_hash: address_hash(&tx.sender) as f64,
            receiver_hash: address_hash(&tx.receiver) as f64,
        };

        // Valid inputs can still overflow a derived feature (amount * hour)
        if let Some((name, value)) = FEATURE_NAMES
            .iter()
            .zip(features.to_array())
            .find(|(_, value)| !value.is_finite())
        {
            return Err(malformed(tx, format!("feature {name} is not finite: {value}")));
        }

        Ok(features)
    }

    /// Encode a static batch with frequencies aggregated over the batch
    /// itself, the way the training set is prepared.
    pub fn encode_batch(
        &self,
        transactions: &[Transaction],
    ) -> Vec<Result<FeatureVector, EncodeError>> {
        let context = FrequencyTable::from_transactions(transactions);
        transactions
            .iter()
            .map(|tx| self.encode(tx, &context))
            .collect()
    }

    /// Reject records the model cannot meaningfully score.
    pub fn validate(&self, tx: &Transaction) -> Result<(), EncodeError> {
        if !tx.amount.is_finite() {
            return Err(malformed(tx, format!("amount is not finite: {}", tx.amount)));
        }
        if tx.amount < 0.0 {
            return Err(malformed(tx, format!("negative amount: {}", tx.amount)));
        }
        if tx.sender.trim().is_empty() {
            return Err(malformed(tx, "empty sender address".to_string()));
        }
        if tx.receiver.trim().is_empty() {
            return Err(malformed(tx, "empty receiver address".to_string()));
        }
        Ok(())
    }

    /// Number of features produced.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Feature names in model input order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn high_amount_threshold(&self) -> f64 {
        self.high_amount_threshold
    }
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn malformed(tx: &Transaction, reason: String) -> EncodeError {
    EncodeError::MalformedRecord { id: tx.id, reason }
}
