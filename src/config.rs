//! Configuration management for the ledger fraud monitor

use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configuration file location
pub const CONFIG_PATH_ENV: &str = "FRAUD_MONITOR_CONFIG";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Default flag threshold, strict inequality
pub const DEFAULT_THRESHOLD: f64 = 0.4;

/// Amount above which a transaction counts as high value.
/// Must equal the value the scoring artifact was trained with.
pub const DEFAULT_HIGH_AMOUNT_THRESHOLD: f64 = 8000.0;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub artifact: ArtifactConfig,
    pub detection: DetectionConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject prefix of the ledger gateway (`<prefix>.length`, `.read`, `.flag`)
    pub ledger_subject_prefix: String,
    /// Subject for outgoing fraud alerts, disabled when absent
    #[serde(default)]
    pub alert_subject: Option<String>,
    /// Upper bound for a single ledger request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    2000
}

/// Scoring artifact location
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Path to the JSON artifact manifest
    pub path: PathBuf,
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Probability above which a transaction is flagged
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Amount above which `is_high_amount` is set
    #[serde(default = "default_high_amount_threshold")]
    pub high_amount_threshold: f64,
    /// Frequency reported for addresses never seen before
    #[serde(default = "default_frequency_floor")]
    pub frequency_floor: u64,
    /// Offset applied to timestamps before deriving hour and weekday
    #[serde(default)]
    pub utc_offset_seconds: i32,
    /// Risk level classification thresholds for alerts
    #[serde(default)]
    pub risk_levels: RiskLevelThresholds,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_high_amount_threshold() -> f64 {
    DEFAULT_HIGH_AMOUNT_THRESHOLD
}

fn default_frequency_floor() -> u64 {
    1
}

/// Monitor loop timing and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between polls when the ledger is healthy
    pub poll_interval_ms: u64,
    /// Sleep after a transient ledger error
    pub backoff_interval_ms: u64,
    /// Retries for a failed flag write before the record is skipped
    pub max_flag_retries: u32,
    /// Delay between flag write retries
    #[serde(default = "default_flag_retry_delay_ms")]
    pub flag_retry_delay_ms: u64,
    /// Consecutive failed iterations before the monitor gives up
    pub max_consecutive_failures: u32,
    /// Interval of the periodic statistics summary
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Where the address frequency table is persisted
    #[serde(default)]
    pub frequency_table_path: Option<PathBuf>,
}

fn default_flag_retry_delay_ms() -> u64 {
    500
}

fn default_report_interval_secs() -> u64 {
    30
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms)
    }

    pub fn flag_retry_delay(&self) -> Duration {
        Duration::from_millis(self.flag_retry_delay_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            backoff_interval_ms: 10000,
            max_flag_retries: 3,
            flag_retry_delay_ms: default_flag_retry_delay_ms(),
            max_consecutive_failures: 10,
            report_interval_secs: default_report_interval_secs(),
            frequency_table_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `FRAUD_MONITOR_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, with `FRAUD_MONITOR__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD_MONITOR").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("detection.threshold must be within [0, 1], got {threshold}");
        }
        if !self.detection.high_amount_threshold.is_finite() {
            anyhow::bail!("detection.high_amount_threshold must be finite");
        }
        if self.monitor.max_consecutive_failures == 0 {
            anyhow::bail!("monitor.max_consecutive_failures must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                ledger_subject_prefix: "ledger".to_string(),
                alert_subject: Some("fraud.alerts".to_string()),
                request_timeout_ms: default_request_timeout_ms(),
            },
            artifact: ArtifactConfig {
                path: PathBuf::from("models/fraud_model.json"),
            },
            detection: DetectionConfig {
                threshold: DEFAULT_THRESHOLD,
                high_amount_threshold: DEFAULT_HIGH_AMOUNT_THRESHOLD,
                frequency_floor: default_frequency_floor(),
                utc_offset_seconds: 0,
                risk_levels: RiskLevelThresholds::default(),
            },
            monitor: MonitorConfig {
                frequency_table_path: Some(PathBuf::from("state/frequency_table.json")),
                ..MonitorConfig::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
