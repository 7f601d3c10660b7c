//! Pipeline metrics and periodic status reporting.

use crate::policy::{DecisionPolicy, RunningStats};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Most recent latency samples kept for percentiles
const LATENCY_WINDOW: usize = 10_000;

/// Operational counters beyond the detection statistics
pub struct PipelineMetrics {
    /// Records skipped as malformed
    pub skipped_malformed: AtomicU64,
    /// Flags that could not be written after all retries
    pub flag_failures: AtomicU64,
    /// Iterations aborted by a transient ledger error
    pub transient_errors: AtomicU64,
    /// Alerts that could not be published
    pub alert_failures: AtomicU64,
    /// Per-record processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            skipped_malformed: AtomicU64::new(0),
            flag_failures: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            alert_failures: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a scored transaction
    pub fn record_scored(&self, processing_time: Duration, probability: f64) {
        {
            let mut times = self.processing_times.write().unwrap_or_else(PoisonError::into_inner);
            times.push(processing_time.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }

        let bucket = (probability * 10.0).clamp(0.0, 9.0) as usize;
        self.score_buckets.write().unwrap_or_else(PoisonError::into_inner)[bucket] += 1;
    }

    pub fn record_malformed(&self) {
        self.skipped_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flag_failure(&self) {
        self.flag_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failure(&self) {
        self.alert_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = self
            .processing_times
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scored transactions per second since start
    pub fn get_throughput(&self, stats: &RunningStats) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            stats.total_seen as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log a human-readable summary
    pub fn print_summary(&self, stats: &RunningStats) {
        let processing = self.get_processing_stats();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              LEDGER FRAUD MONITOR - STATUS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Scored: {:>8}  │  Throughput: {:>8.2} tx/s  ║",
            stats.total_seen,
            self.get_throughput(stats)
        );
        info!(
            "║ Flagged:             {:>8}  │  Detection Rate: {:>6.1}%  ║",
            stats.flagged,
            stats.detection_rate() * 100.0
        );
        info!(
            "║ Skipped: {:>6}  Flag failures: {:>6}  Ledger errors: {:>6} ║",
            self.skipped_malformed.load(Ordering::Relaxed),
            self.flag_failures.load(Ordering::Relaxed),
            self.transient_errors.load(Ordering::Relaxed)
        );
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar = "█".repeat(((pct / 5.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodic status logger, stops with the monitor's cancellation token
pub struct StatsReporter {
    metrics: Arc<PipelineMetrics>,
    policy: Arc<DecisionPolicy>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, policy: Arc<DecisionPolicy>, interval: Duration) -> Self {
        Self {
            metrics,
            policy,
            interval,
        }
    }

    /// Run until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = self.policy.snapshot();
                    if stats.total_seen > 0 {
                        self.metrics.print_summary(&stats);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}
