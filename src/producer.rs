//! Fraud alert fan-out

use crate::types::alert::FraudAlert;
use anyhow::Result;
use async_nats::Client;
use async_trait::async_trait;
use tracing::debug;

/// Destination for alerts about flagged transactions.
///
/// Delivery is best effort; the ledger flag is the record of truth.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &FraudAlert) -> Result<()>;
}

/// Publishes fraud alerts to a NATS subject
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    subject: String,
}

impl AlertProducer {
    /// Create a new alert producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl AlertSink for AlertProducer {
    async fn publish(&self, alert: &FraudAlert) -> Result<()> {
        let payload = serde_json::to_vec(alert)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = alert.transaction_id,
            confidence = alert.confidence,
            "Published fraud alert"
        );

        Ok(())
    }
}
