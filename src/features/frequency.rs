//! Address frequency statistics shared by training and inference.
//!
//! Training counts how often each address appears in the whole dataset.
//! A live ledger only ever shows a prefix of that, so the monitor keeps a
//! running table that grows as transactions are processed and is persisted
//! between runs.

use crate::types::transaction::Transaction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Source of per-address frequencies for the encoder.
pub trait ContextStats {
    /// Number of transactions in the current context involving `address`
    /// in the given role, `0` if never seen.
    fn sender_count(&self, address: &str) -> u64;
    fn receiver_count(&self, address: &str) -> u64;
}

/// Running sender/receiver counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FrequencyTable {
    senders: HashMap<String, u64>,
    receivers: HashMap<String, u64>,
    /// Highest ledger id already counted; replays at or below it are ignored
    observed_through: u64,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate a static batch in one pass (training-style context).
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let mut table = Self::new();
        for tx in transactions {
            table.count(tx);
        }
        table.observed_through = transactions.iter().map(|tx| tx.id).max().unwrap_or(0);
        table
    }

    /// Count a processed transaction. Returns `false` when the id was
    /// already counted, which happens on at-least-once replay.
    pub fn observe(&mut self, tx: &Transaction) -> bool {
        if tx.id <= self.observed_through {
            debug!(transaction_id = tx.id, "Frequency already observed, skipping");
            return false;
        }
        self.count(tx);
        self.observed_through = tx.id;
        true
    }

    fn count(&mut self, tx: &Transaction) {
        *self.senders.entry(tx.sender.clone()).or_insert(0) += 1;
        *self.receivers.entry(tx.receiver.clone()).or_insert(0) += 1;
    }

    /// View of the table as if `tx` had already been counted.
    ///
    /// A record contributes to its own address frequency at training time,
    /// so scoring uses this view rather than the bare table.
    pub fn including<'a>(&'a self, tx: &'a Transaction) -> WithPending<'a> {
        let pending = tx.id > self.observed_through;
        WithPending {
            table: self,
            tx,
            pending,
        }
    }

    pub fn observed_through(&self) -> u64 {
        self.observed_through
    }

    pub fn distinct_senders(&self) -> usize {
        self.senders.len()
    }

    pub fn distinct_receivers(&self) -> usize {
        self.receivers.len()
    }

    /// Load a persisted table, or start empty if the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No frequency table found, starting empty");
            return Ok(Self::new());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read frequency table {}", path.display()))?;
        let table: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse frequency table {}", path.display()))?;

        info!(
            path = %path.display(),
            senders = table.senders.len(),
            receivers = table.receivers.len(),
            observed_through = table.observed_through,
            "Frequency table loaded"
        );
        Ok(table)
    }

    /// Persist the table atomically (write to a sibling file, then rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec(self)?;
        std::fs::write(&tmp, payload)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(path = %path.display(), observed_through = self.observed_through, "Frequency table saved");
        Ok(())
    }
}

impl ContextStats for FrequencyTable {
    fn sender_count(&self, address: &str) -> u64 {
        self.senders.get(address).copied().unwrap_or(0)
    }

    fn receiver_count(&self, address: &str) -> u64 {
        self.receivers.get(address).copied().unwrap_or(0)
    }
}

/// Plain address → count mapping, used for both roles.
impl ContextStats for HashMap<String, u64> {
    fn sender_count(&self, address: &str) -> u64 {
        self.get(address).copied().unwrap_or(0)
    }

    fn receiver_count(&self, address: &str) -> u64 {
        self.get(address).copied().unwrap_or(0)
    }
}

/// Frequency table plus one not-yet-counted transaction.
pub struct WithPending<'a> {
    table: &'a FrequencyTable,
    tx: &'a Transaction,
    pending: bool,
}

impl ContextStats for WithPending<'_> {
    fn sender_count(&self, address: &str) -> u64 {
        let own = u64::from(self.pending && self.tx.sender == address);
        self.table.sender_count(address) + own
    }

    fn receiver_count(&self, address: &str) -> u64 {
        let own = u64::from(self.pending && self.tx.receiver == address);
        self.table.receiver_count(address) + own
    }
}
