//! Settings of the job monitor sweeps.

use chrono::TimeDelta;
use ort_core::WorkerType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Converts a number of seconds into an age usable for timestamp arithmetic.
fn age_from_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Configuration of the job monitor.
///
/// A snapshot of this struct is taken when the monitor is wired up; the sweeps
/// never observe a partially updated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// The Kubernetes namespace to monitor. Required.
    #[serde(default)]
    pub namespace: String,

    /// Interval of the Reaper in seconds.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Completed jobs older than this many seconds are reaped.
    #[serde(default = "default_reaper_max_age")]
    pub reaper_max_age_secs: u64,

    /// Interval of the lost-job detection in seconds.
    #[serde(default = "default_lost_jobs_interval")]
    pub lost_jobs_interval_secs: u64,

    /// Minimum age in seconds of a persisted job or run before it can be
    /// considered lost. Covers the propagation delay from the database to the
    /// cluster.
    #[serde(default = "default_lost_jobs_min_age")]
    pub lost_jobs_min_age_secs: u64,

    /// Window in seconds during which a processed job is not processed again.
    #[serde(default = "default_recently_processed_interval")]
    pub recently_processed_interval_secs: u64,

    /// Interval of the long-running job detection in seconds.
    #[serde(default = "default_long_running_jobs_interval")]
    pub long_running_jobs_interval_secs: u64,

    /// Interval of the stuck run detection in seconds.
    #[serde(default = "default_stuck_jobs_interval")]
    pub stuck_jobs_interval_secs: u64,

    /// Minimum age in seconds of an active run before it can be considered
    /// stuck.
    #[serde(default = "default_stuck_jobs_min_age")]
    pub stuck_jobs_min_age_secs: u64,

    /// Number of jobs a single sweep handles concurrently.
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Enable the watch-based processing of finished jobs.
    #[serde(default = "default_true")]
    pub watching_enabled: bool,

    /// Enable the Reaper.
    #[serde(default = "default_true")]
    pub reaper_enabled: bool,

    /// Enable the lost-job detection.
    #[serde(default = "default_true")]
    pub lost_jobs_enabled: bool,

    /// Enable the long-running job detection.
    #[serde(default = "default_true")]
    pub long_running_jobs_enabled: bool,

    /// Enable the detection of runs whose jobs have all finished.
    #[serde(default = "default_true")]
    pub stuck_jobs_enabled: bool,

    /// Per-worker timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_reaper_interval() -> u64 {
    600
}

fn default_reaper_max_age() -> u64 {
    600
}

fn default_lost_jobs_interval() -> u64 {
    120
}

fn default_lost_jobs_min_age() -> u64 {
    30
}

fn default_recently_processed_interval() -> u64 {
    60
}

fn default_long_running_jobs_interval() -> u64 {
    60
}

fn default_stuck_jobs_interval() -> u64 {
    300
}

fn default_stuck_jobs_min_age() -> u64 {
    600
}

fn default_sweep_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            reaper_interval_secs: default_reaper_interval(),
            reaper_max_age_secs: default_reaper_max_age(),
            lost_jobs_interval_secs: default_lost_jobs_interval(),
            lost_jobs_min_age_secs: default_lost_jobs_min_age(),
            recently_processed_interval_secs: default_recently_processed_interval(),
            long_running_jobs_interval_secs: default_long_running_jobs_interval(),
            stuck_jobs_interval_secs: default_stuck_jobs_interval(),
            stuck_jobs_min_age_secs: default_stuck_jobs_min_age(),
            sweep_concurrency: default_sweep_concurrency(),
            watching_enabled: true,
            reaper_enabled: true,
            lost_jobs_enabled: true,
            long_running_jobs_enabled: true,
            stuck_jobs_enabled: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Returns a configuration for the given namespace with default settings.
    #[must_use]
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    #[must_use]
    pub fn reaper_max_age(&self) -> TimeDelta {
        age_from_secs(self.reaper_max_age_secs)
    }

    #[must_use]
    pub const fn lost_jobs_interval(&self) -> Duration {
        Duration::from_secs(self.lost_jobs_interval_secs)
    }

    #[must_use]
    pub fn lost_jobs_min_age(&self) -> TimeDelta {
        age_from_secs(self.lost_jobs_min_age_secs)
    }

    #[must_use]
    pub fn recently_processed_interval(&self) -> TimeDelta {
        age_from_secs(self.recently_processed_interval_secs)
    }

    #[must_use]
    pub const fn long_running_jobs_interval(&self) -> Duration {
        Duration::from_secs(self.long_running_jobs_interval_secs)
    }

    #[must_use]
    pub const fn stuck_jobs_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_jobs_interval_secs)
    }

    #[must_use]
    pub fn stuck_jobs_min_age(&self) -> TimeDelta {
        age_from_secs(self.stuck_jobs_min_age_secs)
    }
}

/// Maximum run time of a job per worker type, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    #[serde(default = "default_config_timeout")]
    pub config: u64,
    #[serde(default = "default_analyzer_timeout")]
    pub analyzer: u64,
    #[serde(default = "default_advisor_timeout")]
    pub advisor: u64,
    #[serde(default = "default_scanner_timeout")]
    pub scanner: u64,
    #[serde(default = "default_evaluator_timeout")]
    pub evaluator: u64,
    #[serde(default = "default_reporter_timeout")]
    pub reporter: u64,
    #[serde(default = "default_notifier_timeout")]
    pub notifier: u64,
}

fn default_config_timeout() -> u64 {
    5
}

fn default_analyzer_timeout() -> u64 {
    180
}

fn default_advisor_timeout() -> u64 {
    30
}

fn default_scanner_timeout() -> u64 {
    1440
}

fn default_evaluator_timeout() -> u64 {
    30
}

fn default_reporter_timeout() -> u64 {
    60
}

fn default_notifier_timeout() -> u64 {
    15
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            config: default_config_timeout(),
            analyzer: default_analyzer_timeout(),
            advisor: default_advisor_timeout(),
            scanner: default_scanner_timeout(),
            evaluator: default_evaluator_timeout(),
            reporter: default_reporter_timeout(),
            notifier: default_notifier_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Returns the configured timeout in minutes for a worker type.
    #[must_use]
    pub const fn minutes_for(&self, worker: WorkerType) -> u64 {
        match worker {
            WorkerType::Config => self.config,
            WorkerType::Analyzer => self.analyzer,
            WorkerType::Advisor => self.advisor,
            WorkerType::Scanner => self.scanner,
            WorkerType::Evaluator => self.evaluator,
            WorkerType::Reporter => self.reporter,
            WorkerType::Notifier => self.notifier,
        }
    }

    /// Returns the timeout for a worker type.
    #[must_use]
    pub fn timeout_for(&self, worker: WorkerType) -> TimeDelta {
        age_from_secs(self.minutes_for(worker).saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert!(config.namespace.is_empty());
        assert_eq!(config.reaper_interval(), Duration::from_secs(600));
        assert_eq!(config.lost_jobs_min_age(), TimeDelta::seconds(30));
        assert!(config.watching_enabled);
        assert!(config.reaper_enabled);
        assert!(config.lost_jobs_enabled);
        assert!(config.long_running_jobs_enabled);
        assert!(config.stuck_jobs_enabled);
        assert_eq!(config.stuck_jobs_interval(), Duration::from_secs(300));
        assert_eq!(config.stuck_jobs_min_age(), TimeDelta::minutes(10));
    }

    #[test]
    fn test_for_namespace() {
        let config = MonitorConfig::for_namespace("ort-server");
        assert_eq!(config.namespace, "ort-server");
        assert_eq!(config.sweep_concurrency, 4);
    }

    #[test]
    fn test_timeout_lookup_covers_every_worker() {
        let timeouts = TimeoutConfig {
            config: 1,
            analyzer: 2,
            advisor: 3,
            scanner: 4,
            evaluator: 5,
            reporter: 6,
            notifier: 7,
        };

        let minutes: Vec<_> = WorkerType::ALL
            .into_iter()
            .map(|w| timeouts.minutes_for(w))
            .collect();
        assert_eq!(minutes, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(timeouts.timeout_for(WorkerType::Scanner), TimeDelta::minutes(4));
    }

    #[test]
    fn test_huge_ages_do_not_overflow() {
        let config = MonitorConfig {
            reaper_max_age_secs: u64::MAX,
            ..MonitorConfig::default()
        };
        assert_eq!(config.reaper_max_age(), TimeDelta::MAX);
    }

    #[test]
    fn test_deserialize_with_partial_timeouts() {
        let config: MonitorConfig = serde_json::from_str(
            r#"{"namespace": "ort", "reaper_max_age_secs": 120, "timeouts": {"scanner": 600}}"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "ort");
        assert_eq!(config.reaper_max_age(), TimeDelta::minutes(2));
        assert_eq!(config.timeouts.scanner, 600);
        assert_eq!(config.timeouts.analyzer, 180);
    }
}
