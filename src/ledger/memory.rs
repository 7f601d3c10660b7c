//! In-process ledger for tests, demos and replay.

use super::Ledger;
use crate::error::LedgerError;
use crate::types::transaction::Transaction;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Append-only transaction list guarded by a lock.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    transactions: RwLock<Vec<Transaction>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction and return its id.
    pub fn append(&self, sender: &str, receiver: &str, amount: f64, timestamp: i64) -> u64 {
        let mut txs = self.transactions.write().unwrap_or_else(PoisonError::into_inner);
        let id = txs.len() as u64 + 1;
        txs.push(Transaction::new(id, sender, receiver, amount, timestamp));
        debug!(transaction_id = id, amount = amount, "Transaction appended");
        id
    }

    /// Copy of every stored transaction.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: u64) -> Option<Transaction> {
        let txs = self.transactions.read().unwrap_or_else(PoisonError::into_inner);
        index(id).and_then(|i| txs.get(i)).cloned()
    }
}

fn index(id: u64) -> Option<usize> {
    id.checked_sub(1).map(|i| i as usize)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn length(&self) -> Result<u64, LedgerError> {
        Ok(self.transactions.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    async fn read(&self, id: u64) -> Result<Transaction, LedgerError> {
        self.get(id).ok_or(LedgerError::NotFound(id))
    }

    async fn append_flag(&self, id: u64, confidence: f64) -> Result<(), LedgerError> {
        let mut txs = self.transactions.write().unwrap_or_else(PoisonError::into_inner);
        let tx = index(id)
            .and_then(|i| txs.get_mut(i))
            .ok_or(LedgerError::NotFound(id))?;

        match tx.ml_confidence {
            Some(existing) if tx.is_flagged && existing == confidence => Ok(()),
            Some(existing) if tx.is_flagged => Err(LedgerError::Rejected(format!(
                "transaction {id} already flagged with confidence {existing}"
            ))),
            _ => {
                tx.is_flagged = true;
                tx.ml_confidence = Some(confidence);
                Ok(())
            }
        }
    }
}
