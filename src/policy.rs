//! Threshold decision policy and running detection statistics.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// What to do with a scored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Flag,
}

/// Process-lifetime detection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunningStats {
    pub total_seen: u64,
    pub flagged: u64,
}

impl RunningStats {
    /// Fraction of seen transactions that were flagged
    pub fn detection_rate(&self) -> f64 {
        if self.total_seen == 0 {
            0.0
        } else {
            self.flagged as f64 / self.total_seen as f64
        }
    }
}

/// Flags a transaction when its probability is strictly above the threshold.
///
/// Counters sit behind a mutex so `decide` may be called from parallel
/// scoring tasks while a reporter takes snapshots.
#[derive(Debug)]
pub struct DecisionPolicy {
    threshold: f64,
    stats: Mutex<RunningStats>,
}

impl DecisionPolicy {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            stats: Mutex::new(RunningStats::default()),
        }
    }

    /// Decide on one probability and count it.
    pub fn decide(&self, probability: f64) -> Action {
        let action = if probability > self.threshold {
            Action::Flag
        } else {
            Action::None
        };

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total_seen += 1;
        if action == Action::Flag {
            stats.flagged += 1;
        }
        action
    }

    /// Consistent copy of the counters.
    pub fn snapshot(&self) -> RunningStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
