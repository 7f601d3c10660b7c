use super::*;
use crate::features::{ContextStats, FEATURE_COUNT, FEATURE_NAMES};
use crate::ledger::MemoryLedger;
use crate::models::{ModelSpec, Scaler, ScoringArtifact};
use crate::types::RiskLevel;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

const MONDAY_MIDNIGHT: i64 = 1_705_276_800;

/// Memory ledger with switchable failures.
#[derive(Default)]
struct FlakyLedger {
    inner: MemoryLedger,
    fail_length: AtomicBool,
    fail_read: Mutex<Option<(u64, LedgerError)>>,
    /// Fail the first read of every id, then serve it
    fail_first_reads: AtomicBool,
    read_ids: Mutex<HashSet<u64>>,
    read_attempts: AtomicU32,
    /// Transient flag failures still to inject
    flag_failures: AtomicU32,
    flag_attempts: AtomicU32,
}

impl FlakyLedger {
    fn fail_read(&self, id: u64, error: LedgerError) {
        *self.fail_read.lock().unwrap() = Some((id, error));
    }

    fn heal(&self) {
        self.fail_length.store(false, Ordering::SeqCst);
        *self.fail_read.lock().unwrap() = None;
        self.flag_failures.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn length(&self) -> Result<u64, LedgerError> {
        if self.fail_length.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("node offline".to_string()));
        }
        self.inner.length().await
    }

    async fn read(&self, id: u64) -> Result<Transaction, LedgerError> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        let first_read = self.read_ids.lock().unwrap().insert(id);
        if first_read && self.fail_first_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Timeout(1));
        }

        let injected = self.fail_read.lock().unwrap().clone();
        if let Some((failing, error)) = injected {
            if failing == id {
                return Err(error);
            }
        }
        self.inner.read(id).await
    }

    async fn append_flag(&self, id: u64, confidence: f64) -> Result<(), LedgerError> {
        self.flag_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .flag_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Timeout(2000));
        }
        self.inner.append_flag(id, confidence).await
    }
}

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<FraudAlert>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn publish(&self, alert: &FraudAlert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Logistic model driven only by `is_high_amount` and `is_unusual_hour`:
/// 9000 at 02:00 scores about 0.88, 500 at 14:00 about 0.05.
fn scorer() -> Arc<FraudScorer> {
    let mut weights = vec![0.0; FEATURE_COUNT];
    weights[2] = 3.0;
    weights[4] = 2.0;
    let artifact = ScoringArtifact {
        version: "test".to_string(),
        feature_order: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        scaler: Scaler::identity(FEATURE_COUNT),
        model: ModelSpec::Logistic {
            weights,
            intercept: -3.0,
        },
    };
    Arc::new(FraudScorer::from_artifact(artifact, Path::new(".")).unwrap())
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        max_consecutive_failures: 3,
        ..MonitorSettings::default()
    }
}

fn monitor(ledger: Arc<dyn Ledger>, start: u64, settings: MonitorSettings) -> MonitorLoop {
    MonitorLoop::new(
        ledger,
        FeatureEncoder::new(),
        scorer(),
        Arc::new(DecisionPolicy::new(0.4)),
        settings,
        LedgerCursor::new(start),
    )
}

fn at(hour: i64) -> i64 {
    MONDAY_MIDNIGHT + hour * 3600
}

/// One suspicious transaction followed by two ordinary ones.
fn seed(ledger: &MemoryLedger) {
    ledger.append("0xa", "0xb", 9000.0, at(2));
    ledger.append("0xc", "0xd", 500.0, at(14));
    ledger.append("0xa", "0xd", 500.0, at(14));
}

fn processed(outcome: CycleOutcome) -> BatchReport {
    match outcome {
        CycleOutcome::Processed(report) => report,
        other => panic!("expected processed batch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_flags_suspicious_transaction() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let mut monitor = monitor(ledger.clone(), 0, settings());

    let report = processed(monitor.poll_once().await.unwrap());

    assert_eq!(report, BatchReport { scored: 3, flagged: 1, skipped: 0, flag_failures: 0 });
    assert_eq!(monitor.cursor().last_processed_id(), 3);
    assert_eq!(monitor.stats(), RunningStats { total_seen: 3, flagged: 1 });

    let txs = ledger.transactions();
    assert!(txs[0].is_flagged);
    let confidence = txs[0].ml_confidence.unwrap();
    assert!((confidence - 1.0 / (1.0 + (-2.0_f64).exp())).abs() < 1e-12);
    assert!(!txs[1].is_flagged && txs[1].ml_confidence.is_none());
    assert!(!txs[2].is_flagged);
}

#[tokio::test]
async fn test_idle_when_nothing_new() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let mut monitor = monitor(ledger.clone(), 3, settings());

    assert_eq!(monitor.poll_once().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(monitor.cursor().last_processed_id(), 3);
    assert_eq!(monitor.stats(), RunningStats::default());
}

#[tokio::test]
async fn test_starts_at_ledger_head() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let cursor = LedgerCursor::at_head(ledger.as_ref()).await.unwrap();
    let mut monitor = MonitorLoop::new(
        ledger.clone(),
        FeatureEncoder::new(),
        scorer(),
        Arc::new(DecisionPolicy::new(0.4)),
        settings(),
        cursor,
    );

    assert_eq!(monitor.poll_once().await.unwrap(), CycleOutcome::Idle);
    assert!(!ledger.get(1).unwrap().is_flagged);

    ledger.append("0xe", "0xf", 9500.0, at(3));
    let report = processed(monitor.poll_once().await.unwrap());
    assert_eq!(report.scored, 1);
    assert_eq!(monitor.cursor().last_processed_id(), 4);
    assert!(ledger.get(4).unwrap().is_flagged);
}

#[tokio::test]
async fn test_malformed_record_skipped() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let metrics = Arc::new(PipelineMetrics::new());
    let mut monitor = monitor(ledger.clone(), 0, settings()).with_metrics(metrics.clone());
    monitor.poll_once().await.unwrap();

    ledger.append("0xe", "0xb", -5.0, at(12));
    let report = processed(monitor.poll_once().await.unwrap());

    assert_eq!(report.skipped, 1);
    assert_eq!(report.scored, 0);
    assert_eq!(monitor.cursor().last_processed_id(), 4);
    assert_eq!(monitor.stats().total_seen, 3);
    assert_eq!(metrics.skipped_malformed.load(Ordering::Relaxed), 1);
    assert_eq!(monitor.frequencies().receiver_count("0xb"), 1);
}

#[tokio::test]
async fn test_read_failure_keeps_cursor() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.fail_read(1, LedgerError::Unavailable("connection reset".to_string()));
    let mut monitor = monitor(ledger.clone(), 0, settings());

    assert!(matches!(
        monitor.poll_once().await.unwrap(),
        CycleOutcome::Backoff(LedgerError::Unavailable(_))
    ));
    assert_eq!(monitor.cursor().last_processed_id(), 0);
    assert_eq!(monitor.stats().total_seen, 0);
    assert_eq!(monitor.consecutive_failures(), 1);

    ledger.heal();
    let report = processed(monitor.poll_once().await.unwrap());
    assert_eq!(report.scored, 3);
    assert_eq!(monitor.cursor().last_processed_id(), 3);
    assert_eq!(monitor.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_mid_batch_failure_advances_to_last_handled() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.fail_read(2, LedgerError::Timeout(2000));
    let mut monitor = monitor(ledger.clone(), 0, settings());

    assert!(matches!(monitor.poll_once().await.unwrap(), CycleOutcome::Backoff(_)));
    assert_eq!(monitor.cursor().last_processed_id(), 1);
    assert!(ledger.inner.get(1).unwrap().is_flagged);

    ledger.heal();
    let report = processed(monitor.poll_once().await.unwrap());
    assert_eq!(report.scored, 2);
    assert_eq!(monitor.stats(), RunningStats { total_seen: 3, flagged: 1 });
}

#[tokio::test]
async fn test_lagging_ledger_read_is_retried() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.fail_read(3, LedgerError::NotFound(3));
    let mut monitor = monitor(ledger.clone(), 0, settings());

    assert!(matches!(monitor.poll_once().await.unwrap(), CycleOutcome::Backoff(_)));
    assert_eq!(monitor.cursor().last_processed_id(), 2);
}

#[tokio::test]
async fn test_unreadable_record_skipped() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.fail_read(2, LedgerError::Protocol("bad payload".to_string()));
    let mut monitor = monitor(ledger.clone(), 0, settings());

    let report = processed(monitor.poll_once().await.unwrap());
    assert_eq!(report.skipped, 1);
    assert_eq!(report.scored, 2);
    assert_eq!(monitor.cursor().last_processed_id(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_flag_write_retried() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.flag_failures.store(2, Ordering::SeqCst);
    let mut monitor = monitor(ledger.clone(), 0, settings());

    let report = processed(monitor.poll_once().await.unwrap());

    assert_eq!(report.flag_failures, 0);
    assert_eq!(ledger.flag_attempts.load(Ordering::SeqCst), 3);
    assert!(ledger.inner.get(1).unwrap().is_flagged);
}

#[tokio::test(start_paused = true)]
async fn test_flag_write_gives_up_and_advances() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.flag_failures.store(u32::MAX, Ordering::SeqCst);
    let metrics = Arc::new(PipelineMetrics::new());
    let mut monitor = monitor(ledger.clone(), 0, settings()).with_metrics(metrics.clone());

    let report = processed(monitor.poll_once().await.unwrap());

    assert_eq!(report.flag_failures, 1);
    assert_eq!(ledger.flag_attempts.load(Ordering::SeqCst), 4);
    assert_eq!(metrics.flag_failures.load(Ordering::Relaxed), 1);
    assert_eq!(monitor.cursor().last_processed_id(), 3);
    assert!(!ledger.inner.get(1).unwrap().is_flagged);
}

#[tokio::test]
async fn test_replay_does_not_reflag() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);

    let mut first = monitor(ledger.clone(), 0, settings());
    first.poll_once().await.unwrap();
    let after_first = ledger.inner.transactions();

    let mut replay = monitor(ledger.clone(), 0, settings()).with_frequencies(first.frequencies().clone());
    let report = processed(replay.poll_once().await.unwrap());

    assert_eq!(report.flagged, 1);
    assert_eq!(ledger.flag_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.inner.transactions(), after_first);
    assert_eq!(replay.frequencies(), first.frequencies());
}

#[tokio::test]
async fn test_alert_published_after_flag() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = monitor(ledger.clone(), 0, settings()).with_alerts(sink.clone());

    monitor.poll_once().await.unwrap();

    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].transaction_id, 1);
    assert_eq!(alerts[0].risk_level, RiskLevel::High);
    assert_eq!(Some(alerts[0].confidence), ledger.get(1).unwrap().ml_confidence);
}

#[tokio::test]
async fn test_frequencies_accumulate_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("frequencies.json");
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let settings = MonitorSettings {
        frequency_table_path: Some(path.clone()),
        ..settings()
    };
    let mut monitor = monitor(ledger.clone(), 0, settings);

    monitor.poll_once().await.unwrap();

    assert_eq!(monitor.frequencies().sender_count("0xa"), 2);
    assert_eq!(monitor.frequencies().receiver_count("0xd"), 2);
    let saved = FrequencyTable::load_or_default(&path).unwrap();
    assert_eq!(&saved, monitor.frequencies());
    assert_eq!(saved.observed_through(), 3);
}

#[tokio::test]
async fn test_shrinking_ledger_is_fatal() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let mut monitor = monitor(ledger.clone(), 5, settings());

    assert!(matches!(
        monitor.poll_once().await,
        Err(MonitorError::Invariant(CursorError::InvariantViolation { current: 5, requested: 3 }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_after_consecutive_failures() {
    let ledger = Arc::new(FlakyLedger::default());
    ledger.fail_length.store(true, Ordering::SeqCst);
    let mut monitor = monitor(ledger.clone(), 0, settings());

    let result = monitor.run(CancellationToken::new()).await;

    match result {
        Err(MonitorError::Unhealthy { consecutive_failures, last_error }) => {
            assert_eq!(consecutive_failures, 3);
            assert!(last_error.is_transient());
        }
        other => panic!("expected unhealthy, got {other:?}"),
    }
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_run_polls_until_cancelled() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut monitor = monitor(ledger.clone(), 0, settings());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = monitor.run(cancel).await;
            (monitor, result)
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    ledger.append("0xa", "0xb", 9000.0, at(2));
    tokio::time::sleep(Duration::from_secs(6)).await;
    cancel.cancel();

    let (monitor, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(monitor.cursor().last_processed_id(), 1);
    assert!(ledger.get(1).unwrap().is_flagged);
}

#[tokio::test]
async fn test_cancelled_before_start_does_not_poll() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let mut monitor = monitor(ledger.clone(), 0, settings());
    let cancel = CancellationToken::new();
    cancel.cancel();

    monitor.run(cancel).await.unwrap();

    assert_eq!(monitor.cursor().last_processed_id(), 0);
    assert!(!ledger.get(1).unwrap().is_flagged);
}

#[tokio::test]
async fn test_overflowing_amount_skipped() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.append("0xa", "0xb", f64::MAX, at(2));
    ledger.append("0xc", "0xd", 500.0, at(14));
    let metrics = Arc::new(PipelineMetrics::new());
    let mut monitor = monitor(ledger.clone(), 0, settings()).with_metrics(metrics.clone());

    let report = processed(monitor.poll_once().await.unwrap());

    assert_eq!(report.skipped, 1);
    assert_eq!(report.scored, 1);
    assert_eq!(monitor.cursor().last_processed_id(), 2);
    assert_eq!(metrics.skipped_malformed.load(Ordering::Relaxed), 1);
    assert!(!ledger.get(1).unwrap().is_flagged);
}

#[tokio::test]
async fn test_progressing_cycles_stay_healthy() {
    let ledger = Arc::new(FlakyLedger::default());
    for hour in 10..16 {
        ledger.inner.append("0xa", "0xb", 500.0, at(hour));
    }
    ledger.fail_first_reads.store(true, Ordering::SeqCst);
    let mut monitor = monitor(ledger.clone(), 0, settings());

    let mut backoffs = 0;
    loop {
        match monitor.poll_once().await.unwrap() {
            CycleOutcome::Backoff(_) => {
                backoffs += 1;
                assert!(monitor.consecutive_failures() <= 1);
            }
            CycleOutcome::Processed(_) => break,
            CycleOutcome::Idle => panic!("ledger still has pending records"),
        }
        assert!(backoffs <= 6, "monitor stopped making progress");
    }

    assert_eq!(backoffs, 6);
    assert_eq!(monitor.cursor().last_processed_id(), 6);
    assert_eq!(monitor.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_waits_backoff_after_transient_error() {
    let ledger = Arc::new(FlakyLedger::default());
    seed(&ledger.inner);
    ledger.fail_read(1, LedgerError::Unavailable("connection reset".to_string()));
    let mut monitor = monitor(ledger.clone(), 0, settings());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = monitor.run(cancel).await;
            (monitor, result)
        }
    });

    // Past the poll interval (5s) but inside the backoff interval (10s)
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(ledger.read_attempts.load(Ordering::SeqCst), 1);
    assert!(!ledger.inner.get(1).unwrap().is_flagged);

    ledger.heal();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ledger.read_attempts.load(Ordering::SeqCst), 4);
    assert!(ledger.inner.get(1).unwrap().is_flagged);

    cancel.cancel();
    let (monitor, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(monitor.cursor().last_processed_id(), 3);
}
