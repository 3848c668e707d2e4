use async_trait::async_trait;
use ort_config::TimeoutConfig;
use ort_core::{Clock, OrtError, OrtResult, WorkerType};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::recent::before;
use crate::{JobExt, JobHandler, MonitorMetrics, Task};

/// Terminates jobs that exceed the timeout of their worker.
///
/// No notification is sent. Once the job is gone, the next run of the
/// [`LostJobsFinder`](crate::LostJobsFinder) reports it as lost.
pub struct LongRunningJobsFinder {
    handler: Arc<JobHandler>,
    timeouts: TimeoutConfig,
    clock: Arc<dyn Clock>,
}

impl LongRunningJobsFinder {
    pub const NAME: &'static str = "long-running-jobs";

    #[must_use]
    pub fn new(handler: Arc<JobHandler>, timeouts: TimeoutConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            handler,
            timeouts,
            clock,
        }
    }

    async fn check_worker(&self, worker: WorkerType) -> OrtResult<()> {
        let threshold = before(self.clock.now(), self.timeouts.timeout_for(worker));
        debug!(worker = %worker, threshold = %threshold, "Checking for long-running jobs");

        let jobs = self.handler.find_jobs_for_worker(worker).await?;
        for job in jobs.iter().filter(|job| job.is_timeout(threshold)) {
            let Some(job_name) = job.name() else {
                continue;
            };

            warn!(
                job_name,
                worker = %worker,
                trace_id = %job.trace_id(),
                "Deleting job that exceeded its timeout"
            );
            MonitorMetrics::long_running_job(worker);
            self.handler.delete_job(job_name).await;
        }

        Ok(())
    }
}

#[async_trait]
impl Task for LongRunningJobsFinder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self) -> OrtResult<()> {
        info!("Checking for long-running jobs");

        let mut first_error: Option<OrtError> = None;
        for worker in WorkerType::ALL {
            if let Err(e) = self.check_worker(worker).await {
                warn!(worker = %worker, error = %e, "Could not check for long-running jobs");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
