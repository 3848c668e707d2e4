use async_trait::async_trait;
use chrono::TimeDelta;
use ort_core::{Clock, OrtError, OrtResult, WorkerType};
use ort_repository::{ActiveOrtRun, OrtRunRepository, WorkerJobRepositories};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use crate::handler::run_span;
use crate::recent::before;
use crate::{JobExt, JobHandler, JobNotifier, MonitorMetrics, Task};

/// Detects runs that are still active although none of their jobs is.
///
/// A run is stuck when every worker job recorded for it has finished, or when
/// it has no job at all, and no job without persisted state is still running
/// for it in the cluster. The orchestrator is asked to finish such runs.
pub struct StuckJobsFinder {
    handler: Arc<JobHandler>,
    notifier: Arc<dyn JobNotifier>,
    job_repositories: WorkerJobRepositories,
    run_repository: Arc<dyn OrtRunRepository>,
    min_age: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl StuckJobsFinder {
    pub const NAME: &'static str = "stuck-jobs";

    /// Creates a finder ignoring runs younger than `min_age`.
    #[must_use]
    pub fn new(
        handler: Arc<JobHandler>,
        notifier: Arc<dyn JobNotifier>,
        job_repositories: WorkerJobRepositories,
        run_repository: Arc<dyn OrtRunRepository>,
        min_age: TimeDelta,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            handler,
            notifier,
            job_repositories,
            run_repository,
            min_age,
            clock,
        }
    }

    /// Runs with an unfinished job of a worker that persists no jobs.
    async fn runs_with_running_cluster_jobs(&self) -> OrtResult<HashSet<i64>> {
        let mut run_ids = HashSet::new();
        for worker in WorkerType::ALL
            .into_iter()
            .filter(|worker| !worker.has_job_repository())
        {
            let jobs = self.handler.find_jobs_for_worker(worker).await?;
            run_ids.extend(
                jobs.iter()
                    .filter(|job| !job.is_completed())
                    .filter_map(JobExt::ort_run_id),
            );
        }
        Ok(run_ids)
    }

    /// Whether all persisted jobs of the run have finished.
    async fn all_jobs_finished(&self, run: &ActiveOrtRun) -> OrtResult<bool> {
        for worker in WorkerType::ALL {
            let Some(repository) = self.job_repositories.for_worker(worker) else {
                continue;
            };

            if let Some(job) = repository.find_for_run(run.run_id).await? {
                if !job.is_finished() {
                    debug!(ort_run_id = run.run_id, worker = %worker, "Run has an unfinished job");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn report_stuck_run(&self, run: &ActiveOrtRun) {
        async {
            warn!("Found active ORT run without unfinished jobs");
            MonitorMetrics::stuck_run();
            if let Err(e) = self.notifier.send_stuck_jobs_notification(run).await {
                error!(error = %e, "Failed to notify about stuck run");
                MonitorMetrics::notification_failed("stuck-jobs");
            }
        }
        .instrument(run_span(Some(&run.trace_id), Some(run.run_id)))
        .await;
    }
}

#[async_trait]
impl Task for StuckJobsFinder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self) -> OrtResult<()> {
        info!("Checking for stuck ORT runs");

        let reference_time = before(self.clock.now(), self.min_age);
        let running = self.runs_with_running_cluster_jobs().await?;
        let runs = self.run_repository.list_active_runs().await?;

        let mut first_error: Option<OrtError> = None;

        for run in runs
            .iter()
            .filter(|run| run.created_at <= reference_time && !running.contains(&run.run_id))
        {
            match self.all_jobs_finished(run).await {
                Ok(true) => self.report_stuck_run(run).await,
                Ok(false) => {}
                Err(e) => {
                    warn!(ort_run_id = run.run_id, error = %e, "Could not check the jobs of run");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
