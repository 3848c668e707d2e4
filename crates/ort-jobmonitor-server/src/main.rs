//! # ORT Job Monitor
//!
//! Entry point of the job monitor process.
//!
//! Runs in one of two modes:
//! - **Monitor**: sweeps and job watcher run until SIGTERM or Ctrl+C
//! - **Task runner**: the tasks listed in `task_runner.tasks` run once, and
//!   the exit code reports whether all of them succeeded

use ort_config::{AppConfig, ConfigLoader};
use ort_core::telemetry::{init_telemetry, shutdown_telemetry};
use ort_core::{OrtResult, SystemClock};
use ort_jobmonitor::FailedJobNotifier;
use ort_jobmonitor_server::startup::{
    connect_kubernetes, connect_repositories, install_metrics_exporter, monitor_gateway,
    orchestrator_sender, print_banner, print_startup_info,
};
use ort_jobmonitor_server::{Dependencies, Monitor};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ConfigLoader::from_default_location() {
        Ok(loader) => loader.get().await,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.observability.telemetry()) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let result = run(config).await;
    shutdown_telemetry();

    if let Err(e) = result {
        error!("Job monitor error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> OrtResult<()> {
    print_startup_info(&config);

    if let Some(port) = config.observability.metrics_port {
        install_metrics_exporter(port)?;
    }

    let client = connect_kubernetes().await?;
    let gateway = monitor_gateway(client.clone(), &config);
    let sender = orchestrator_sender(client, &config).await?;

    let database = if config.requires_database() {
        Some(connect_repositories(&config).await?)
    } else {
        None
    };

    let monitor = Monitor::new(
        &config,
        Dependencies {
            gateway,
            notifier: Arc::new(FailedJobNotifier::new(sender)),
            repositories: database.as_ref().map(|(_, repositories)| repositories.clone()),
            clock: Arc::new(SystemClock),
        },
    );

    let result = if config.task_runner.tasks.is_empty() {
        monitor.run(shutdown_signal()).await
    } else {
        info!(tasks = ?config.task_runner.tasks, "Running in task runner mode");
        monitor.run_tasks(&config.task_runner.tasks).await
    };

    if let Some((pool, _)) = database {
        pool.close().await;
    }

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
