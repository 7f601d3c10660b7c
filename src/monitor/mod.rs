//! Ledger monitoring loop.
//!
//! One worker polls the ledger length, fetches every id past the cursor in
//! increasing order, scores it and writes flags back. Delivery is
//! at-least-once: a transient ledger error aborts the batch without moving
//! the cursor past the failed id, so that id is fetched again after backoff.
//!
//! Error handling per stage:
//! - transient ledger errors back off and retry, up to a consecutive-failure cap
//! - malformed records are logged, skipped, and the cursor moves past them
//! - flag write failures are retried a bounded number of times, then skipped
//! - cursor regressions and model failures stop the loop

pub mod cursor;
#[cfg(test)]
mod tests;

use crate::config::AppConfig;
use crate::error::{CursorError, LedgerError, MonitorError};
use crate::features::{FeatureEncoder, FrequencyTable};
use crate::ledger::Ledger;
use crate::metrics::PipelineMetrics;
use crate::models::FraudScorer;
use crate::policy::{Action, DecisionPolicy, RunningStats};
use crate::producer::AlertSink;
use crate::types::{FraudAlert, RiskLevelThresholds, Transaction};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub use cursor::LedgerCursor;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Fetching,
    Scoring,
    Deciding,
    Flagging,
    Advancing,
    Sleeping,
    Stopped,
}

/// Timing and retry knobs for the loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub backoff_interval: Duration,
    pub max_flag_retries: u32,
    pub flag_retry_delay: Duration,
    pub max_consecutive_failures: u32,
    pub frequency_table_path: Option<PathBuf>,
    pub risk_levels: RiskLevelThresholds,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.monitor.poll_interval(),
            backoff_interval: config.monitor.backoff_interval(),
            max_flag_retries: config.monitor.max_flag_retries,
            flag_retry_delay: config.monitor.flag_retry_delay(),
            max_consecutive_failures: config.monitor.max_consecutive_failures,
            frequency_table_path: config.monitor.frequency_table_path.clone(),
            risk_levels: config.detection.risk_levels.clone(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            backoff_interval: Duration::from_secs(10),
            max_flag_retries: 3,
            flag_retry_delay: Duration::from_millis(500),
            max_consecutive_failures: 10,
            frequency_table_path: None,
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

/// Counts for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub scored: u64,
    pub flagged: u64,
    pub skipped: u64,
    pub flag_failures: u64,
}

/// Result of a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No new transactions
    Idle,
    /// All pending ids were handled
    Processed(BatchReport),
    /// A transient ledger error aborted the cycle; back off before retrying
    Backoff(LedgerError),
}

/// Drives polling, scoring and flagging against one ledger.
///
/// Owns the cursor; a second loop must never share it.
pub struct MonitorLoop {
    ledger: Arc<dyn Ledger>,
    encoder: FeatureEncoder,
    scorer: Arc<FraudScorer>,
    policy: Arc<DecisionPolicy>,
    metrics: Arc<PipelineMetrics>,
    alerts: Option<Arc<dyn AlertSink>>,
    settings: MonitorSettings,
    cursor: LedgerCursor,
    frequencies: FrequencyTable,
    frequencies_dirty: bool,
    consecutive_failures: u32,
    state: MonitorState,
}

impl MonitorLoop {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        encoder: FeatureEncoder,
        scorer: Arc<FraudScorer>,
        policy: Arc<DecisionPolicy>,
        settings: MonitorSettings,
        cursor: LedgerCursor,
    ) -> Self {
        Self {
            ledger,
            encoder,
            scorer,
            policy,
            metrics: Arc::new(PipelineMetrics::new()),
            alerts: None,
            settings,
            cursor,
            frequencies: FrequencyTable::new(),
            frequencies_dirty: false,
            consecutive_failures: 0,
            state: MonitorState::Idle,
        }
    }

    /// Share a metrics collector with a reporter
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Publish an alert for every successful flag
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Resume from a previously persisted frequency table
    pub fn with_frequencies(mut self, frequencies: FrequencyTable) -> Self {
        self.frequencies = frequencies;
        self
    }

    pub fn cursor(&self) -> LedgerCursor {
        self.cursor
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> RunningStats {
        self.policy.snapshot()
    }

    pub fn frequencies(&self) -> &FrequencyTable {
        &self.frequencies
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Poll until cancelled or a fatal error occurs.
    ///
    /// Cancellation is honoured before each poll and during every sleep.
    /// A batch in progress is always finished first, so no flag write is
    /// interrupted.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), MonitorError> {
        info!(
            last_processed_id = self.cursor.last_processed_id(),
            threshold = self.policy.threshold(),
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Monitor started"
        );

        while !cancel.is_cancelled() {
            let delay = match self.poll_once().await {
                Ok(CycleOutcome::Backoff(_)) => self.settings.backoff_interval,
                Ok(_) => self.settings.poll_interval,
                Err(e) => {
                    error!(error = %e, "Monitor stopping on fatal error");
                    self.persist_frequencies();
                    self.transition(MonitorState::Stopped);
                    return Err(e);
                }
            };

            self.transition(MonitorState::Sleeping);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.persist_frequencies();
        self.transition(MonitorState::Stopped);
        info!(
            last_processed_id = self.cursor.last_processed_id(),
            "Monitor stopped"
        );
        Ok(())
    }

    /// One poll: fetch and handle every id past the cursor.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, MonitorError> {
        self.transition(MonitorState::Polling);

        let length = match self.ledger.length().await {
            Ok(length) => length,
            Err(e) => return self.on_ledger_failure(e),
        };

        let last = self.cursor.last_processed_id();
        if length < last {
            return Err(CursorError::InvariantViolation {
                current: last,
                requested: length,
            }
            .into());
        }

        let pending = self.cursor.pending_range(length);
        if pending.is_empty() {
            self.consecutive_failures = 0;
            trace!(length = length, "No new transactions");
            return Ok(CycleOutcome::Idle);
        }

        info!(
            new = length - last,
            from = *pending.start(),
            to = *pending.end(),
            "New transactions found"
        );

        let mut report = BatchReport::default();
        for id in pending {
            self.transition(MonitorState::Fetching);
            let tx = match self.ledger.read(id).await {
                Ok(tx) => Some(tx),
                Err(e) if e.is_transient() => {
                    self.persist_frequencies();
                    // Only cycles that made no progress count toward the health limit
                    if self.cursor.last_processed_id() > last {
                        self.consecutive_failures = 0;
                    }
                    return self.on_ledger_failure(e);
                }
                Err(e) => {
                    warn!(transaction_id = id, error = %e, "Unreadable transaction, skipping");
                    self.metrics.record_malformed();
                    report.skipped += 1;
                    None
                }
            };

            if let Some(tx) = tx {
                self.handle(tx, &mut report).await?;
            }

            self.transition(MonitorState::Advancing);
            self.cursor.advance_to(id)?;
        }

        self.consecutive_failures = 0;
        self.persist_frequencies();

        let stats = self.policy.snapshot();
        info!(
            scored = report.scored,
            flagged = report.flagged,
            skipped = report.skipped,
            last_processed_id = self.cursor.last_processed_id(),
            total_seen = stats.total_seen,
            detection_rate = format!("{:.2}", stats.detection_rate()),
            "Batch processed"
        );

        Ok(CycleOutcome::Processed(report))
    }

    /// Score, decide and if needed flag one fetched transaction.
    async fn handle(&mut self, tx: Transaction, report: &mut BatchReport) -> Result<(), MonitorError> {
        let started = Instant::now();

        self.transition(MonitorState::Scoring);
        let features = match self.encoder.encode(&tx, &self.frequencies.including(&tx)) {
            Ok(features) => features,
            Err(e) => {
                warn!(transaction_id = tx.id, error = %e, "Malformed transaction, skipping");
                self.metrics.record_malformed();
                report.skipped += 1;
                return Ok(());
            }
        };
        let result = self.scorer.score(&features)?;
        self.frequencies_dirty |= self.frequencies.observe(&tx);

        self.transition(MonitorState::Deciding);
        let action = self.policy.decide(result.probability);
        self.metrics.record_scored(started.elapsed(), result.probability);
        report.scored += 1;

        if action == Action::None {
            debug!(
                transaction_id = tx.id,
                probability = result.probability,
                "Transaction processed (below threshold)"
            );
            return Ok(());
        }

        report.flagged += 1;
        if tx.is_flagged {
            debug!(
                transaction_id = tx.id,
                existing_confidence = ?tx.ml_confidence,
                "Already flagged on ledger, not writing again"
            );
            return Ok(());
        }

        self.transition(MonitorState::Flagging);
        if self.write_flag(tx.id, result.probability).await {
            info!(
                transaction_id = tx.id,
                probability = result.probability,
                amount = tx.amount,
                receiver = %tx.receiver,
                "Suspicious transaction flagged"
            );
            self.publish_alert(&tx, result.probability).await;
        } else {
            report.flag_failures += 1;
        }
        Ok(())
    }

    /// Write the flag, retrying transient failures a bounded number of times.
    async fn write_flag(&self, id: u64, confidence: f64) -> bool {
        let attempts = self.settings.max_flag_retries + 1;
        for attempt in 1..=attempts {
            match self.ledger.append_flag(id, confidence).await {
                Ok(()) => return true,
                Err(e) if !e.is_transient() => {
                    error!(transaction_id = id, error = %e, "Flag write rejected, skipping");
                    break;
                }
                Err(e) => {
                    warn!(
                        transaction_id = id,
                        attempt = attempt,
                        attempts = attempts,
                        error = %e,
                        "Flag write failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.flag_retry_delay).await;
                    }
                }
            }
        }

        error!(transaction_id = id, confidence = confidence, "Giving up on flag write");
        self.metrics.record_flag_failure();
        false
    }

    async fn publish_alert(&self, tx: &Transaction, confidence: f64) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        let alert = FraudAlert::new(tx, confidence, &self.settings.risk_levels);
        if let Err(e) = alerts.publish(&alert).await {
            self.metrics.record_alert_failure();
            warn!(transaction_id = tx.id, error = %e, "Failed to publish fraud alert");
        }
    }

    fn on_ledger_failure(&mut self, e: LedgerError) -> Result<CycleOutcome, MonitorError> {
        self.metrics.record_transient();
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.settings.max_consecutive_failures {
            error!(
                consecutive_failures = self.consecutive_failures,
                error = %e,
                "Ledger unhealthy"
            );
            return Err(MonitorError::Unhealthy {
                consecutive_failures: self.consecutive_failures,
                last_error: e,
            });
        }

        warn!(
            consecutive_failures = self.consecutive_failures,
            last_processed_id = self.cursor.last_processed_id(),
            backoff_ms = self.settings.backoff_interval.as_millis() as u64,
            error = %e,
            "Ledger error, backing off"
        );
        Ok(CycleOutcome::Backoff(e))
    }

    fn persist_frequencies(&mut self) {
        if !self.frequencies_dirty {
            return;
        }
        let Some(path) = &self.settings.frequency_table_path else {
            return;
        };
        match self.frequencies.save(path) {
            Ok(()) => self.frequencies_dirty = false,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to persist frequency table"),
        }
    }

    fn transition(&mut self, next: MonitorState) {
        trace!(from = ?self.state, to = ?next, "Monitor state");
        self.state = next;
    }
}
