//! Ledger access.
//!
//! The ledger is an external append-only store addressed by dense ids
//! starting at 1. The monitor only needs its length, single-record reads
//! and the flag write-back.

pub mod memory;
pub mod nats;

use crate::error::LedgerError;
use crate::types::transaction::Transaction;
use async_trait::async_trait;

pub use memory::MemoryLedger;
pub use nats::NatsLedger;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Number of transactions appended so far (also the highest id).
    async fn length(&self) -> Result<u64, LedgerError>;

    /// Read one transaction by id.
    async fn read(&self, id: u64) -> Result<Transaction, LedgerError>;

    /// Mark a transaction as suspicious with the model confidence.
    ///
    /// A single atomic ledger operation. Repeating it with the same
    /// confidence must leave the ledger unchanged.
    async fn append_flag(&self, id: u64, confidence: f64) -> Result<(), LedgerError>;
}
