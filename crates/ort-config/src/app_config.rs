//! Application configuration structures.

use crate::MonitorConfig;
use ort_core::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Job monitor sweeps.
    #[serde(default)]
    pub job_monitor: MonitorConfig,

    /// Kubernetes API client settings.
    #[serde(default)]
    pub kubernetes: KubernetesClientConfig,

    /// How messages reach the orchestrator.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// One-shot task execution.
    #[serde(default)]
    pub task_runner: TaskRunnerConfig,
}

impl AppConfig {
    /// Whether the selected tasks need the database.
    ///
    /// Only the lost-job and stuck run detections read persisted state. In
    /// task runner mode the listed tasks decide, otherwise the enable flags do.
    #[must_use]
    pub fn requires_database(&self) -> bool {
        if self.task_runner.tasks.is_empty() {
            self.job_monitor.lost_jobs_enabled || self.job_monitor.stuck_jobs_enabled
        } else {
            self.task_runner
                .tasks
                .iter()
                .any(|task| task == "lost-jobs" || task == "stuck-jobs")
        }
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "ort-jobmonitor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Kubernetes API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesClientConfig {
    /// Upper bound for a single API call in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay before a failed watch is re-established, in seconds.
    #[serde(default = "default_watch_restart_delay")]
    pub watch_restart_delay_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_watch_restart_delay() -> u64 {
    5
}

impl Default for KubernetesClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            watch_restart_delay_secs: default_watch_restart_delay(),
        }
    }
}

impl KubernetesClientConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Transport implementations a sender can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Messages become Kubernetes jobs.
    Kubernetes,
    /// Messages are pushed onto a Redis list.
    #[default]
    Redis,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Transport used to notify the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Selected transport.
    #[serde(default)]
    pub transport: TransportKind,

    /// Job template settings when the Kubernetes transport is selected.
    #[serde(default)]
    pub kubernetes: KubernetesSenderSettings,
}

/// Raw settings of the Kubernetes message sender.
///
/// List-like values are kept as strings in the format operators write them in
/// and are parsed by the sender:
///
/// * `commands`, `args`: whitespace separated, double quotes group words.
/// * `mount_secrets`: `secret->/mount/path` entries.
/// * `mount_pvcs`: `claim->/mount/path,R` (read-only) or `,W` entries.
/// * `annotation_variables`: comma separated names of environment variables
///   holding `key=value` annotations.
///
/// String values may contain `${name}` placeholders that are resolved from the
/// `kubernetes.<name>` transport properties of the sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSenderSettings {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,
    #[serde(default)]
    pub image_pull_secret: Option<String>,
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: i32,
    #[serde(default)]
    pub commands: String,
    #[serde(default)]
    pub args: String,
    /// User id the worker container runs as.
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub mount_secrets: String,
    #[serde(default)]
    pub mount_pvcs: String,
    #[serde(default)]
    pub annotation_variables: String,
    #[serde(default)]
    pub cpu_request: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub memory_request: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub enable_debug_logging: bool,
}

fn default_image_pull_policy() -> String {
    "Never".to_string()
}

fn default_restart_policy() -> String {
    "OnFailure".to_string()
}

fn default_backoff_limit() -> i32 {
    2
}

impl Default for KubernetesSenderSettings {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            image_name: String::new(),
            image_pull_policy: default_image_pull_policy(),
            image_pull_secret: None,
            restart_policy: default_restart_policy(),
            backoff_limit: default_backoff_limit(),
            commands: String::new(),
            args: String::new(),
            user_id: None,
            service_account_name: None,
            mount_secrets: String::new(),
            mount_pvcs: String::new(),
            annotation_variables: String::new(),
            cpu_request: None,
            cpu_limit: None,
            memory_request: None,
            memory_limit: None,
            enable_debug_logging: false,
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Connection pool size.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    /// Prefix of all keys written by the transport.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    8
}

fn default_key_prefix() -> String {
    "ort".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost:5432/ort".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
    /// Service name reported to the tracing backend.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP endpoint for span export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio.
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Port of the Prometheus scrape endpoint. Metrics are not exported if unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "ort-jobmonitor".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// Returns the settings relevant for tracing initialization.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.service_name.clone(),
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
            otlp_endpoint: self.otlp_endpoint.clone(),
            sampling_ratio: self.sampling_ratio,
        }
    }
}

/// One-shot task execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRunnerConfig {
    /// Names of the tasks to run once. The scheduler is started if empty.
    #[serde(default)]
    pub tasks: Vec<String>,
}
