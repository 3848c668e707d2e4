//! Watch-based processing of finished jobs.

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use ort_transport::labels::all_workers_selector;
use ort_transport::ClusterJobGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{JobExt, JobHandler};

/// Handles jobs as soon as the cluster reports them finished.
///
/// The Reaper catches whatever the watch misses; both go through the same
/// [`JobHandler`], so a job seen by both is processed once.
pub struct JobMonitor {
    gateway: Arc<dyn ClusterJobGateway>,
    handler: Arc<JobHandler>,
    restart_delay: Duration,
}

impl JobMonitor {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ClusterJobGateway>,
        handler: Arc<JobHandler>,
        restart_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            handler,
            restart_delay,
        }
    }

    /// Watches worker jobs until a shutdown signal arrives.
    ///
    /// A failed or ended watch is re-established after the restart delay.
    pub async fn watch(&self, mut shutdown: broadcast::Receiver<()>) {
        let selector = all_workers_selector();

        loop {
            info!(selector = %selector, "Starting to watch jobs");
            let mut events = self.gateway.watch_jobs(&selector);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Job watcher stopped");
                        return;
                    }

                    event = events.next() => match event {
                        Some(Ok(job)) => self.on_job_changed(&job).await,
                        Some(Err(e)) => {
                            warn!(error = %e, "Job watch failed");
                            break;
                        }
                        None => {
                            debug!("Job watch ended");
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Job watcher stopped");
                    return;
                }
                () = tokio::time::sleep(self.restart_delay) => {}
            }
        }
    }

    async fn on_job_changed(&self, job: &Job) {
        if job.is_completed() {
            debug!(job_name = job.name().unwrap_or_default(), "Job finished");
            self.handler.delete_and_notify_if_failed(job).await;
        }
    }
}
