use async_trait::async_trait;
use chrono::TimeDelta;
use ort_core::{Clock, OrtError, OrtResult, WorkerType};
use ort_repository::{OrtRunRepository, WorkerJob, WorkerJobRepositories, WorkerJobRepository};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use crate::handler::run_span;
use crate::recent::before;
use crate::{JobExt, JobHandler, JobNotifier, MonitorMetrics, Task};

/// Detects work the database considers active but the cluster no longer runs.
///
/// Jobs can vanish without the Reaper ever seeing them finish, e.g. when a
/// node is lost or a job is deleted by hand. For every worker with persisted
/// jobs, active database entries without a cluster job are reported as lost.
/// Active runs with no job at all, neither in the database nor in the cluster,
/// are reported as lost schedules so the orchestrator can resume them.
pub struct LostJobsFinder {
    handler: Arc<JobHandler>,
    notifier: Arc<dyn JobNotifier>,
    job_repositories: WorkerJobRepositories,
    run_repository: Arc<dyn OrtRunRepository>,
    min_age: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl LostJobsFinder {
    pub const NAME: &'static str = "lost-jobs";

    /// Creates a finder ignoring persisted jobs and runs younger than
    /// `min_age`.
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

    /// Reports the lost jobs of one worker and returns the ids of the runs
    /// that have jobs of this worker.
    async fn check_worker(
        &self,
        worker: WorkerType,
        repository: &dyn WorkerJobRepository,
    ) -> OrtResult<HashSet<i64>> {
        let now = self.clock.now();

        let cluster_jobs = self.handler.find_jobs_for_worker(worker).await?;
        let mut runs_with_jobs: HashSet<i64> =
            cluster_jobs.iter().filter_map(JobExt::ort_run_id).collect();

        debug!(
            worker = %worker,
            count = cluster_jobs.len(),
            jobs = ?cluster_jobs.iter().filter_map(JobExt::name).collect::<Vec<_>>(),
            "Found active Kubernetes jobs"
        );

        let lost_jobs: Vec<WorkerJob> = repository
            .list_active(before(now, self.min_age))
            .await?
            .into_iter()
            .filter(|job| !runs_with_jobs.contains(&job.ort_run_id))
            .collect();

        if !lost_jobs.is_empty() {
            warn!(worker = %worker, count = lost_jobs.len(), "Found lost jobs");
            debug!(worker = %worker, jobs = ?lost_jobs, "Lost jobs");

            for job in &lost_jobs {
                self.report_lost_job(worker, job.ort_run_id).await;
            }
        }

        runs_with_jobs.extend(lost_jobs.iter().map(|job| job.ort_run_id));
        Ok(runs_with_jobs)
    }

    async fn report_lost_job(&self, worker: WorkerType, ort_run_id: i64) {
        let trace_id = match self.run_repository.find_trace_id(ort_run_id).await {
            Ok(trace_id) => trace_id,
            Err(e) => {
                warn!(ort_run_id, error = %e, "Could not look up trace id of run");
                None
            }
        };

        async {
            MonitorMetrics::lost_job(worker);
            if let Err(e) = self
                .notifier
                .send_lost_job_notification(ort_run_id, worker)
                .await
            {
                error!(worker = %worker, error = %e, "Failed to notify about lost job");
                MonitorMetrics::notification_failed("lost-job");
            }
        }
        .instrument(run_span(trace_id.as_deref(), Some(ort_run_id)))
        .await;
    }

    /// Reports active runs that are not contained in `runs_with_jobs`.
    async fn check_lost_schedules(&self, mut runs_with_jobs: HashSet<i64>) -> OrtResult<()> {
        let reference_time = before(self.clock.now(), self.min_age);

        // Workers without persisted jobs are only visible in the cluster.
        for worker in WorkerType::ALL
            .into_iter()
            .filter(|worker| !worker.has_job_repository())
        {
            let jobs = self.handler.find_jobs_for_worker(worker).await?;
            runs_with_jobs.extend(jobs.iter().filter_map(JobExt::ort_run_id));
        }

        let runs = self.run_repository.list_active_runs().await?;
        for run in runs
            .iter()
            .filter(|run| run.created_at <= reference_time && !runs_with_jobs.contains(&run.run_id))
        {
            async {
                warn!(ort_run_id = run.run_id, "Found ORT run with missing schedules");
                MonitorMetrics::lost_schedule();
                if let Err(e) = self.notifier.send_lost_schedule_notification(run).await {
                    error!(error = %e, "Failed to notify about lost schedule");
                    MonitorMetrics::notification_failed("lost-schedule");
                }
            }
            .instrument(run_span(Some(&run.trace_id), Some(run.run_id)))
            .await;
        }

        Ok(())
    }
}

#[async_trait]
impl Task for LostJobsFinder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self) -> OrtResult<()> {
        info!("Checking for lost jobs and missing schedules");

        let mut runs_with_jobs = HashSet::new();
        let mut first_error: Option<OrtError> = None;

        for worker in WorkerType::ALL {
            let Some(repository) = self.job_repositories.for_worker(worker) else {
                continue;
            };

            match self.check_worker(worker, repository.as_ref()).await {
                Ok(run_ids) => runs_with_jobs.extend(run_ids),
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Could not check for lost jobs");
                    first_error.get_or_insert(e);
                }
            }
        }

        // An incomplete picture of the runs with jobs would report healthy
        // runs as lost.
        if let Some(e) = first_error {
            warn!("Skipping the check for lost schedules");
            return Err(e);
        }

        self.check_lost_schedules(runs_with_jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MockJobNotifier;
    use crate::testing::{
        active_job, at, worker_job, FakeOrtRunRepository, FakeWorkerJobRepository, JobStatusExt,
    };
    use crate::RecentlyProcessedJobs;
    use mockall::predicate::eq;
    use ort_core::ManualClock;
    use ort_repository::ActiveOrtRun;
    use ort_transport::{GatewayOperation, InMemoryJobGateway};

    const NOW: i64 = 10_000;

    struct Fixture {
        gateway: Arc<InMemoryJobGateway>,
        repositories: WorkerJobRepositories,
        runs: Vec<ActiveOrtRun>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                gateway: Arc::new(InMemoryJobGateway::new()),
                repositories: WorkerJobRepositories::uniform(Arc::new(
                    FakeWorkerJobRepository::default(),
                )),
                runs: Vec::new(),
            }
        }

        fn finder(self, notifier: MockJobNotifier) -> (Arc<InMemoryJobGateway>, LostJobsFinder) {
            let clock = Arc::new(ManualClock::new(at(NOW)));
            let notifier: Arc<dyn JobNotifier> = Arc::new(notifier);
            let handler = JobHandler::new(
                self.gateway.clone(),
                notifier.clone(),
                RecentlyProcessedJobs::new(TimeDelta::seconds(60), clock.clone()),
            );
            let finder = LostJobsFinder::new(
                Arc::new(handler),
                notifier,
                self.repositories,
                Arc::new(FakeOrtRunRepository::with_runs(self.runs)),
                TimeDelta::seconds(30),
                clock,
            );
            (self.gateway, finder)
        }
    }

    fn run(run_id: i64, created_at: i64) -> ActiveOrtRun {
        ActiveOrtRun {
            run_id,
            created_at: at(created_at),
            trace_id: format!("trace-{run_id}"),
        }
    }

    fn notifier_without_schedules() -> MockJobNotifier {
        let mut notifier = MockJobNotifier::new();
        notifier.expect_send_lost_schedule_notification().never();
        notifier
    }

    #[tokio::test]
    async fn test_lost_job_is_reported() {
        let mut fixture = Fixture::new();
        fixture.repositories.analyzer = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(42, at(NOW - 100)),
        ]));

        let mut notifier = notifier_without_schedules();
        notifier
            .expect_send_lost_job_notification()
            .with(eq(42), eq(WorkerType::Analyzer))
            .times(1)
            .returning(|_, _| Ok(()));

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_job_with_cluster_counterpart_is_not_lost() {
        let mut fixture = Fixture::new();
        fixture.repositories.analyzer = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(42, at(NOW - 100)),
        ]));
        fixture
            .gateway
            .add_job(worker_job(WorkerType::Analyzer, "t42", 42).started_at(at(NOW - 90)));

        let mut notifier = notifier_without_schedules();
        notifier.expect_send_lost_job_notification().never();

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_young_jobs_are_not_considered() {
        let mut fixture = Fixture::new();
        fixture.repositories.scanner = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(5, at(NOW - 10)),
        ]));

        let mut notifier = notifier_without_schedules();
        notifier.expect_send_lost_job_notification().never();

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_job_of_other_worker_does_not_count() {
        let mut fixture = Fixture::new();
        fixture.repositories.reporter = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(8, at(NOW - 100)),
        ]));
        fixture
            .gateway
            .add_job(worker_job(WorkerType::Evaluator, "t8", 8));

        let mut notifier = notifier_without_schedules();
        notifier
            .expect_send_lost_job_notification()
            .with(eq(8), eq(WorkerType::Reporter))
            .times(1)
            .returning(|_, _| Ok(()));

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_schedule_is_reported() {
        let mut fixture = Fixture::new();
        fixture.runs = vec![run(1, NOW - 100), run(2, NOW - 100), run(3, NOW - 100)];
        fixture.gateway.add_job(worker_job(WorkerType::Scanner, "t2", 2));
        fixture.gateway.add_job(worker_job(WorkerType::Config, "t3", 3));

        let mut notifier = MockJobNotifier::new();
        notifier.expect_send_lost_job_notification().never();
        notifier
            .expect_send_lost_schedule_notification()
            .withf(|run| run.run_id == 1 && run.trace_id == "trace-1")
            .times(1)
            .returning(|_| Ok(()));

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_with_lost_job_has_no_lost_schedule() {
        let mut fixture = Fixture::new();
        fixture.runs = vec![run(4, NOW - 100)];
        fixture.repositories.advisor = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(4, at(NOW - 100)),
        ]));

        let mut notifier = notifier_without_schedules();
        notifier
            .expect_send_lost_job_notification()
            .with(eq(4), eq(WorkerType::Advisor))
            .times(1)
            .returning(|_, _| Ok(()));

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_young_run_has_no_lost_schedule() {
        let mut fixture = Fixture::new();
        fixture.runs = vec![run(6, NOW - 5)];

        let (_, finder) = fixture.finder(notifier_without_schedules());
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_notification_failures_do_not_abort_the_sweep() {
        let mut fixture = Fixture::new();
        fixture.repositories.analyzer = Arc::new(FakeWorkerJobRepository::with_jobs(vec![
            active_job(1, at(NOW - 100)),
            active_job(2, at(NOW - 100)),
        ]));

        let mut notifier = notifier_without_schedules();
        notifier
            .expect_send_lost_job_notification()
            .times(2)
            .returning(|_, _| Err(OrtError::transport("unreachable")));

        let (_, finder) = fixture.finder(notifier);
        finder.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_repository_failure_skips_lost_schedules() {
        let mut fixture = Fixture::new();
        fixture.runs = vec![run(1, NOW - 100)];
        fixture.repositories.scanner = Arc::new(FakeWorkerJobRepository::failing());

        let (_, finder) = fixture.finder(notifier_without_schedules());
        let result = finder.execute().await;

        assert!(matches!(result, Err(OrtError::Database(_))));
    }

    #[tokio::test]
    async fn test_cluster_failure_is_returned() {
        let fixture = Fixture::new();
        fixture.gateway.fail(GatewayOperation::ListJobs);

        let (gateway, finder) = fixture.finder(notifier_without_schedules());
        assert!(finder.execute().await.is_err());

        gateway.recover(GatewayOperation::ListJobs);
        assert!(finder.execute().await.is_ok());
    }
}
