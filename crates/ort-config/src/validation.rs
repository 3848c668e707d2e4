//! Configuration validation module.
//!
//! All values are checked up front and every problem is reported at once,
//! so a broken deployment fails at startup instead of in the middle of a sweep.

use crate::{AppConfig, KubernetesSenderSettings, MonitorConfig, TransportKind};
use ort_core::WorkerType;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// A property without a usable default is missing.
    MissingRequired { key: String },
    /// An interval or age must be positive.
    NonPositiveDuration { name: String },
    /// A worker timeout must be positive.
    NonPositiveTimeout { worker: WorkerType },
    /// Sweep concurrency must be at least one.
    InvalidConcurrency { value: usize },
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Sampling ratio must be between 0.0 and 1.0.
    InvalidSamplingRatio { value: f64 },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// A task name given to the task runner is unknown.
    UnknownTask { name: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired { key } => {
                write!(f, "Missing required configuration property '{}'", key)
            }
            Self::NonPositiveDuration { name } => {
                write!(f, "Duration '{}' must be positive", name)
            }
            Self::NonPositiveTimeout { worker } => {
                write!(f, "Timeout of worker '{}' must be positive", worker)
            }
            Self::InvalidConcurrency { value } => {
                write!(f, "Invalid sweep concurrency: {} (must be at least 1)", value)
            }
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({}) cannot be greater than max ({})",
                    min, max
                )
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::InvalidSamplingRatio { value } => {
                write!(
                    f,
                    "Invalid sampling ratio: {} (must be between 0.0 and 1.0)",
                    value
                )
            }
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                    value
                )
            }
            Self::UnknownTask { name } => {
                write!(
                    f,
                    "Unknown task '{}' (valid: {})",
                    name,
                    ConfigValidator::TASK_NAMES.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    ///
    /// # Errors
    ///
    /// Returns every collected error if at least one was found.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];

    /// Names accepted by the task runner.
    pub const TASK_NAMES: &'static [&'static str] =
        &["reaper", "lost-jobs", "long-running-jobs", "stuck-jobs"];

    /// Validates the entire application configuration.
    ///
    /// # Errors
    ///
    /// Returns all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        Self::validate_monitor(&config.job_monitor, &mut result);
        match config.orchestrator.transport {
            TransportKind::Kubernetes => {
                Self::validate_sender(&config.orchestrator.kubernetes, &mut result);
            }
            TransportKind::Redis => Self::validate_redis(&config.redis, &mut result),
        }
        if config.requires_database() {
            Self::validate_database(&config.database, &mut result);
        }
        Self::validate_observability(&config.observability, &mut result);
        Self::validate_task_runner(&config.task_runner, &mut result);

        result.into_result()
    }

    /// Validates the job monitor settings.
    fn validate_monitor(config: &MonitorConfig, result: &mut ValidationResult) {
        if config.namespace.trim().is_empty() {
            result.add_error(ConfigValidationError::MissingRequired {
                key: "job_monitor.namespace".to_string(),
            });
        }

        let durations = [
            ("job_monitor.reaper_interval_secs", config.reaper_interval_secs),
            ("job_monitor.reaper_max_age_secs", config.reaper_max_age_secs),
            ("job_monitor.lost_jobs_interval_secs", config.lost_jobs_interval_secs),
            (
                "job_monitor.recently_processed_interval_secs",
                config.recently_processed_interval_secs,
            ),
            (
                "job_monitor.long_running_jobs_interval_secs",
                config.long_running_jobs_interval_secs,
            ),
            ("job_monitor.stuck_jobs_interval_secs", config.stuck_jobs_interval_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                result.add_error(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                });
            }
        }

        for worker in WorkerType::ALL {
            if config.timeouts.minutes_for(worker) == 0 {
                result.add_error(ConfigValidationError::NonPositiveTimeout { worker });
            }
        }

        if config.sweep_concurrency == 0 {
            result.add_error(ConfigValidationError::InvalidConcurrency {
                value: config.sweep_concurrency,
            });
        }
    }

    /// Validates the Kubernetes sender settings.
    fn validate_sender(config: &KubernetesSenderSettings, result: &mut ValidationResult) {
        if config.namespace.trim().is_empty() {
            result.add_error(ConfigValidationError::MissingRequired {
                key: "orchestrator.kubernetes.namespace".to_string(),
            });
        }
        if config.image_name.trim().is_empty() {
            result.add_error(ConfigValidationError::MissingRequired {
                key: "orchestrator.kubernetes.image_name".to_string(),
            });
        }
    }

    /// Validates Redis configuration.
    fn validate_redis(config: &crate::RedisConfig, result: &mut ValidationResult) {
        if !config.url.starts_with("redis://") && !config.url.starts_with("rediss://") {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            });
        } else if let Err(e) = Url::parse(&config.url) {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: e.to_string(),
            });
        }
    }

    /// Validates database configuration.
    fn validate_database(config: &crate::DatabaseConfig, result: &mut ValidationResult) {
        if config.url.is_empty() {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        } else if !config.url.starts_with("postgres://") && !config.url.starts_with("postgresql://")
        {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL must start with postgres:// or postgresql://".to_string(),
            });
        }

        if config.min_connections > config.max_connections {
            result.add_error(ConfigValidationError::InvalidPoolSize {
                min: config.min_connections,
                max: config.max_connections,
            });
        }

        if config.connect_timeout_secs == 0 {
            result.add_error(ConfigValidationError::NonPositiveDuration {
                name: "database.connect_timeout_secs".to_string(),
            });
        }
    }

    /// Validates observability configuration.
    fn validate_observability(config: &crate::ObservabilityConfig, result: &mut ValidationResult) {
        if !(0.0..=1.0).contains(&config.sampling_ratio) {
            result.add_error(ConfigValidationError::InvalidSamplingRatio {
                value: config.sampling_ratio,
            });
        }

        let level = config.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ConfigValidationError::InvalidLogLevel {
                value: config.log_level.clone(),
            });
        }

        if let Some(endpoint) = &config.otlp_endpoint {
            if let Err(e) = Url::parse(endpoint) {
                result.add_error(ConfigValidationError::InvalidUrl {
                    url_type: "OTLP endpoint".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Validates the names of tasks to run once.
    fn validate_task_runner(config: &crate::TaskRunnerConfig, result: &mut ValidationResult) {
        for name in &config.tasks {
            if !Self::TASK_NAMES.contains(&name.as_str()) {
                result.add_error(ConfigValidationError::UnknownTask { name: name.clone() });
            }
        }
    }
}
