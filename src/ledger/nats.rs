//! Ledger client speaking JSON request/reply over NATS.
//!
//! The ledger gateway answers on three subjects under a common prefix:
//! `<prefix>.length`, `<prefix>.read` and `<prefix>.flag`. Errors come back
//! as `{"error": "..."}`, with `"not_found"` reserved for unknown ids.

use super::Ledger;
use crate::error::LedgerError;
use crate::types::transaction::Transaction;
use async_nats::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const NOT_FOUND: &str = "not_found";

/// NATS request/reply ledger client
#[derive(Clone)]
pub struct NatsLedger {
    client: Client,
    prefix: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ReadRequest {
    id: u64,
}

#[derive(Serialize)]
struct FlagRequest {
    id: u64,
    confidence: f64,
}

#[derive(Deserialize)]
struct LengthReply {
    length: u64,
}

#[derive(Deserialize)]
struct FlagReply {
    ok: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Error { error: String },
    Ok(T),
}

impl NatsLedger {
    /// Create a new ledger client
    pub fn new(client: Client, prefix: &str, timeout: Duration) -> Self {
        info!(prefix = %prefix, timeout_ms = timeout.as_millis() as u64, "NATS ledger client ready");
        Self {
            client,
            prefix: prefix.to_string(),
            timeout,
        }
    }

    /// Full subject for one ledger operation
    pub fn subject(&self, operation: &str) -> String {
        format!("{}.{}", self.prefix, operation)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<Reply<T>, LedgerError> {
        let subject = self.subject(operation);

        let message = tokio::time::timeout(self.timeout, self.client.request(subject.clone(), payload.into()))
            .await
            .map_err(|_| LedgerError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        debug!(subject = %subject, bytes = message.payload.len(), "Ledger reply received");

        serde_json::from_slice(&message.payload)
            .map_err(|e| LedgerError::Protocol(format!("{subject}: {e}")))
    }
}

fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(body).map_err(|e| LedgerError::Protocol(e.to_string()))
}

fn rejected(id: Option<u64>, error: String) -> LedgerError {
    match id {
        Some(id) if error == NOT_FOUND => LedgerError::NotFound(id),
        _ => LedgerError::Rejected(error),
    }
}

#[async_trait]
impl Ledger for NatsLedger {
    async fn length(&self) -> Result<u64, LedgerError> {
        match self.request::<LengthReply>("length", Vec::new()).await? {
            Reply::Ok(reply) => Ok(reply.length),
            Reply::Error { error } => Err(rejected(None, error)),
        }
    }

    async fn read(&self, id: u64) -> Result<Transaction, LedgerError> {
        let payload = encode(&ReadRequest { id })?;
        match self.request::<Transaction>("read", payload).await? {
            Reply::Ok(tx) if tx.id == id => Ok(tx),
            Reply::Ok(tx) => Err(LedgerError::Protocol(format!(
                "asked for transaction {id}, got {}",
                tx.id
            ))),
            Reply::Error { error } => Err(rejected(Some(id), error)),
        }
    }

    async fn append_flag(&self, id: u64, confidence: f64) -> Result<(), LedgerError> {
        let payload = encode(&FlagRequest { id, confidence })?;
        match self.request::<FlagReply>("flag", payload).await? {
            Reply::Ok(FlagReply { ok: true }) => Ok(()),
            Reply::Ok(FlagReply { ok: false }) => {
                Err(LedgerError::Rejected(format!("flag for {id} not acknowledged")))
            }
            Reply::Error { error } => Err(rejected(Some(id), error)),
        }
    }
}
