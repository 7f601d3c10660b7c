//! Ledger Fraud Monitor - Main Entry Point
//!
//! Polls the ledger gateway over NATS, scores new transactions and flags
//! suspicious ones until interrupted.

use anyhow::{Context, Result};
use ledger_fraud_monitor::{
    config::{AppConfig, LoggingConfig},
    features::{FeatureEncoder, FrequencyTable},
    ledger::{Ledger, NatsLedger},
    metrics::{PipelineMetrics, StatsReporter},
    models::FraudScorer,
    monitor::{LedgerCursor, MonitorLoop, MonitorSettings},
    policy::DecisionPolicy,
    producer::AlertProducer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Ledger Fraud Monitor");
    info!(
        "Detection threshold: {:.2}, Alert levels: medium>={:.2}, high>={:.2}, critical>={:.2}",
        config.detection.threshold,
        config.detection.risk_levels.medium,
        config.detection.risk_levels.high,
        config.detection.risk_levels.critical
    );

    let encoder = FeatureEncoder::from_config(&config.detection)?;
    info!(
        "Feature encoder initialized ({} features)",
        encoder.feature_count()
    );

    // A missing or inconsistent artifact stops here, before any ledger access
    let scorer = Arc::new(
        FraudScorer::load(&config.artifact.path)
            .with_context(|| format!("Failed to load scoring artifact {}", config.artifact.path.display()))?,
    );
    info!(
        "Scorer loaded: model={}, version={}",
        scorer.model_name(),
        scorer.version()
    );

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let ledger: Arc<dyn Ledger> = Arc::new(NatsLedger::new(
        client.clone(),
        &config.nats.ledger_subject_prefix,
        Duration::from_millis(config.nats.request_timeout_ms),
    ));

    let cursor = LedgerCursor::at_head(ledger.as_ref())
        .await
        .context("Failed to read initial ledger length")?;
    info!(
        "Starting after ledger id {} (existing history is not reprocessed)",
        cursor.last_processed_id()
    );

    let frequencies = match &config.monitor.frequency_table_path {
        Some(path) => FrequencyTable::load_or_default(path)?,
        None => FrequencyTable::new(),
    };

    let policy = Arc::new(DecisionPolicy::new(config.detection.threshold));
    let metrics = Arc::new(PipelineMetrics::new());

    let mut monitor = MonitorLoop::new(
        ledger,
        encoder,
        scorer,
        policy.clone(),
        MonitorSettings::from_config(&config),
        cursor,
    )
    .with_metrics(metrics.clone())
    .with_frequencies(frequencies);

    if let Some(subject) = &config.nats.alert_subject {
        info!("Publishing alerts to: {}", subject);
        monitor = monitor.with_alerts(Arc::new(AlertProducer::new(client.clone(), subject)));
    }

    let cancel = CancellationToken::new();

    let reporter = StatsReporter::new(
        metrics.clone(),
        policy.clone(),
        Duration::from_secs(config.monitor.report_interval_secs),
    );
    let reporter_handle = tokio::spawn(reporter.run(cancel.clone()));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for interrupt, Ctrl-C will not stop the monitor");
                return;
            }
            info!("Interrupt received, stopping after the current batch");
            cancel.cancel();
        }
    });

    let result = monitor.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = reporter_handle.await {
        warn!(error = %e, "Stats reporter task failed");
    }

    info!("Monitor shutting down...");
    metrics.print_summary(&policy.snapshot());

    if let Err(e) = result {
        error!(error = %e, "Monitor terminated");
        return Err(e.into());
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("ledger_fraud_monitor={}", logging.level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
