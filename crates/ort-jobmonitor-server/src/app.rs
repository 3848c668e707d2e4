//! Wiring of the monitor components.

use ort_config::{AppConfig, ConfigValidator, MonitorConfig};
use ort_core::{Clock, OrtError, OrtResult};
use ort_jobmonitor::{
    run_once, JobHandler, JobMonitor, JobNotifier, LongRunningJobsFinder, LostJobsFinder, Reaper,
    RecentlyProcessedJobs, StuckJobsFinder, Task, TaskScheduler,
};
use ort_repository::{OrtRunRepository, WorkerJobRepositories};
use ort_transport::ClusterJobGateway;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Repositories needed to detect lost jobs and stuck runs.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: WorkerJobRepositories,
    pub runs: Arc<dyn OrtRunRepository>,
}

/// External collaborators of the monitor.
pub struct Dependencies {
    pub gateway: Arc<dyn ClusterJobGateway>,
    pub notifier: Arc<dyn JobNotifier>,
    /// `None` if no database is configured; lost-job and stuck run detection
    /// are then unavailable.
    pub repositories: Option<Repositories>,
    pub clock: Arc<dyn Clock>,
}

/// The assembled job monitor.
pub struct Monitor {
    config: MonitorConfig,
    watch_restart_delay: Duration,
    gateway: Arc<dyn ClusterJobGateway>,
    handler: Arc<JobHandler>,
    reaper: Arc<Reaper>,
    lost_jobs_finder: Option<Arc<LostJobsFinder>>,
    long_running_jobs_finder: Arc<LongRunningJobsFinder>,
    stuck_jobs_finder: Option<Arc<StuckJobsFinder>>,
}

impl Monitor {
    #[must_use]
    pub fn new(config: &AppConfig, dependencies: Dependencies) -> Self {
        let monitor_config = config.job_monitor.clone();
        let Dependencies {
            gateway,
            notifier,
            repositories,
            clock,
        } = dependencies;

        let handler = Arc::new(JobHandler::new(
            gateway.clone(),
            notifier.clone(),
            RecentlyProcessedJobs::new(monitor_config.recently_processed_interval(), clock.clone()),
        ));

        let reaper = Arc::new(Reaper::new(
            handler.clone(),
            monitor_config.reaper_max_age(),
            monitor_config.sweep_concurrency,
            clock.clone(),
        ));

        let lost_jobs_finder = repositories.as_ref().map(|repositories| {
            Arc::new(LostJobsFinder::new(
                handler.clone(),
                notifier.clone(),
                repositories.jobs.clone(),
                repositories.runs.clone(),
                monitor_config.lost_jobs_min_age(),
                clock.clone(),
            ))
        });

        let stuck_jobs_finder = repositories.map(|repositories| {
            Arc::new(StuckJobsFinder::new(
                handler.clone(),
                notifier,
                repositories.jobs,
                repositories.runs,
                monitor_config.stuck_jobs_min_age(),
                clock.clone(),
            ))
        });

        let long_running_jobs_finder = Arc::new(LongRunningJobsFinder::new(
            handler.clone(),
            monitor_config.timeouts.clone(),
            clock,
        ));

        Self {
            config: monitor_config,
            watch_restart_delay: config.kubernetes.watch_restart_delay(),
            gateway,
            handler,
            reaper,
            lost_jobs_finder,
            long_running_jobs_finder,
            stuck_jobs_finder,
        }
    }

    /// Looks up a task by name.
    ///
    /// # Errors
    ///
    /// Fails if the name is unknown or the task lacks its repositories.
    pub fn task(&self, name: &str) -> OrtResult<Arc<dyn Task>> {
        match name {
            Reaper::NAME => Ok(self.reaper.clone()),
            LostJobsFinder::NAME => self
                .lost_jobs_finder
                .clone()
                .map(|finder| finder as Arc<dyn Task>)
                .ok_or_else(|| {
                    OrtError::configuration("The lost-jobs task requires a database connection")
                }),
            LongRunningJobsFinder::NAME => Ok(self.long_running_jobs_finder.clone()),
            StuckJobsFinder::NAME => self
                .stuck_jobs_finder
                .clone()
                .map(|finder| finder as Arc<dyn Task>)
                .ok_or_else(|| {
                    OrtError::configuration("The stuck-jobs task requires a database connection")
                }),
            other => Err(OrtError::configuration(format!(
                "Unknown task '{other}', expected one of {}",
                ConfigValidator::TASK_NAMES.join(", ")
            ))),
        }
    }

    /// The enabled sweeps together with their intervals.
    #[must_use]
    pub fn scheduled_tasks(&self) -> Vec<(Arc<dyn Task>, Duration)> {
        let mut tasks: Vec<(Arc<dyn Task>, Duration)> = Vec::new();

        if self.config.reaper_enabled {
            tasks.push((self.reaper.clone(), self.config.reaper_interval()));
        }

        if self.config.lost_jobs_enabled {
            match &self.lost_jobs_finder {
                Some(finder) => tasks.push((finder.clone(), self.config.lost_jobs_interval())),
                None => warn!("Lost-job detection is enabled, but no database is available"),
            }
        }

        if self.config.long_running_jobs_enabled {
            tasks.push((
                self.long_running_jobs_finder.clone(),
                self.config.long_running_jobs_interval(),
            ));
        }

        if self.config.stuck_jobs_enabled {
            match &self.stuck_jobs_finder {
                Some(finder) => tasks.push((finder.clone(), self.config.stuck_jobs_interval())),
                None => warn!("Stuck run detection is enabled, but no database is available"),
            }
        }

        tasks
    }

    /// Runs the named tasks once, concurrently.
    ///
    /// # Errors
    ///
    /// Fails if a task is unknown or any task fails.
    pub async fn run_tasks(&self, names: &[String]) -> OrtResult<()> {
        let tasks = names
            .iter()
            .map(|name| self.task(name))
            .collect::<OrtResult<Vec<_>>>()?;

        if run_once(&tasks).await {
            info!("All tasks completed");
            Ok(())
        } else {
            Err(OrtError::internal("At least one task failed"))
        }
    }

    /// Runs the enabled sweeps and the watcher until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Fails if the scheduler cannot be started.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> OrtResult<()> {
        let mut scheduler = TaskScheduler::new();
        for (task, period) in self.scheduled_tasks() {
            scheduler.schedule(task, period);
        }

        let mut handles = scheduler.start()?;

        if self.config.watching_enabled {
            info!("Starting job watcher");
            let watcher = JobMonitor::new(
                self.gateway.clone(),
                self.handler.clone(),
                self.watch_restart_delay,
            );
            let shutdown_rx = scheduler.shutdown_receiver();
            handles.push(tokio::spawn(async move { watcher.watch(shutdown_rx).await }));
        }

        if handles.is_empty() {
            warn!("Neither a sweep nor the watcher is enabled");
        }

        shutdown.await;
        scheduler.stop();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Monitor loop terminated abnormally");
            }
        }

        info!("Job monitor stopped");
        Ok(())
    }
}
