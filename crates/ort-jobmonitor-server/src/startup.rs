//! Startup utilities: connecting the external systems the monitor needs.

use kube::Client;
use metrics_exporter_prometheus::PrometheusBuilder;
use ort_config::{AppConfig, TransportKind};
use ort_core::{OrtError, OrtResult};
use ort_repository::{DatabasePool, PgOrtRunRepository, PgWorkerJobRepository};
use ort_transport::redis::create_pool;
use ort_transport::{
    create_sender, ClusterJobGateway, Endpoint, KubeJobGateway, KubernetesSenderConfig,
    MessageSender, OrchestratorMessage, TransportConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::app::Repositories;

/// Prints the startup banner.
pub fn print_banner() {
    info!(
        r#"
   ____  ____  ______       __      __                          _ __
  / __ \/ __ \/_  __/      / /___  / /_  ____ ___  ____  ____  (_) /_____  _____
 / / / / /_/ / / /    __  / / __ \/ __ \/ __ `__ \/ __ \/ __ \/ / __/ __ \/ ___/
/ /_/ / _, _/ / /    / /_/ / /_/ / /_/ / / / / / / /_/ / / / / / /_/ /_/ / /
\____/_/ |_| /_/     \____/\____/_.___/_/ /_/ /_/\____/_/ /_/_/\__/\____/_/
    "#
    );
}

/// Prints the effective monitor settings.
pub fn print_startup_info(config: &AppConfig) {
    let monitor = &config.job_monitor;
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Namespace:          {}", monitor.namespace);
    info!("Orchestrator via:   {}", config.orchestrator.transport);
    info!("Watching:           {}", monitor.watching_enabled);
    info!(
        "Reaper:             {} (every {}s)",
        monitor.reaper_enabled, monitor.reaper_interval_secs
    );
    info!(
        "Lost jobs:          {} (every {}s)",
        monitor.lost_jobs_enabled, monitor.lost_jobs_interval_secs
    );
    info!(
        "Long-running jobs:  {} (every {}s)",
        monitor.long_running_jobs_enabled, monitor.long_running_jobs_interval_secs
    );
    info!(
        "Stuck runs:         {} (every {}s)",
        monitor.stuck_jobs_enabled, monitor.stuck_jobs_interval_secs
    );
    if let Some(port) = config.observability.metrics_port {
        info!("Metrics:            http://0.0.0.0:{}/metrics", port);
    }
    info!("{}", separator);
}

/// Serves Prometheus metrics on the given port.
///
/// # Errors
///
/// Fails if the exporter cannot be installed.
pub fn install_metrics_exporter(port: u16) -> OrtResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| OrtError::internal(format!("Failed to install metrics exporter: {e}")))?;

    ort_jobmonitor::register_metrics();
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

/// Connects to the Kubernetes API using the in-cluster or kubeconfig settings.
///
/// # Errors
///
/// Fails if no client configuration can be inferred.
pub async fn connect_kubernetes() -> OrtResult<Client> {
    let client = Client::try_default()
        .await
        .map_err(|e| OrtError::kubernetes(format!("Failed to create Kubernetes client: {e}")))?;
    info!(namespace = %client.default_namespace(), "Connected to Kubernetes API");
    Ok(client)
}

/// Creates the gateway for the jobs of the monitored namespace.
#[must_use]
pub fn monitor_gateway(client: Client, config: &AppConfig) -> Arc<dyn ClusterJobGateway> {
    Arc::new(KubeJobGateway::new(
        client,
        &config.job_monitor.namespace,
        config.kubernetes.request_timeout(),
    ))
}

/// Creates the sender for notifications to the orchestrator.
///
/// # Errors
///
/// Fails if the Redis pool cannot be created.
pub async fn orchestrator_sender(
    client: Client,
    config: &AppConfig,
) -> OrtResult<Arc<dyn MessageSender<OrchestratorMessage>>> {
    let transport = match config.orchestrator.transport {
        TransportKind::Kubernetes => {
            let settings = &config.orchestrator.kubernetes;
            TransportConfig::Kubernetes {
                gateway: Arc::new(KubeJobGateway::new(
                    client,
                    &settings.namespace,
                    config.kubernetes.request_timeout(),
                )),
                config: KubernetesSenderConfig::from_settings(settings),
            }
        }
        TransportKind::Redis => TransportConfig::Redis {
            pool: create_pool(&config.redis).await?,
            key_prefix: config.redis.key_prefix.clone(),
        },
    };

    Ok(create_sender(Endpoint::Orchestrator, transport))
}

/// Connects the database and creates the repositories for lost-job and stuck
/// run detection.
///
/// # Errors
///
/// Fails if the database cannot be reached.
pub async fn connect_repositories(config: &AppConfig) -> OrtResult<(DatabasePool, Repositories)> {
    let pool = DatabasePool::new(&config.database).await?;
    pool.health_check().await?;

    let repositories = Repositories {
        jobs: PgWorkerJobRepository::all(&pool),
        runs: Arc::new(PgOrtRunRepository::new(&pool)),
    };
    Ok((pool, repositories))
}
