//! Queries and mutations on worker jobs shared by all sweeps.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use k8s_openapi::api::batch::v1::Job;
use ort_core::{OrtResult, WorkerType};
use ort_transport::labels::{all_workers_selector, job_pods_selector, worker_selector};
use ort_transport::{ClusterJobGateway, Endpoint};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::{JobExt, JobNotifier, MonitorMetrics, RecentlyProcessedJobs};

/// Span carrying the identity of the run a log event belongs to.
pub(crate) fn run_span(trace_id: Option<&str>, ort_run_id: Option<i64>) -> Span {
    let trace_id = trace_id.filter(|id| !id.is_empty()).unwrap_or("unknown");
    let ort_run_id = ort_run_id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
    info_span!("ort_run", trace_id = %trace_id, ort_run_id = %ort_run_id)
}

/// Access to the worker jobs of the monitored namespace.
pub struct JobHandler {
    gateway: Arc<dyn ClusterJobGateway>,
    notifier: Arc<dyn JobNotifier>,
    recent: RecentlyProcessedJobs,
}

impl JobHandler {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ClusterJobGateway>,
        notifier: Arc<dyn JobNotifier>,
        recent: RecentlyProcessedJobs,
    ) -> Self {
        Self {
            gateway,
            notifier,
            recent,
        }
    }

    /// Returns the jobs of all endpoints that finished before `time`.
    ///
    /// # Errors
    ///
    /// Fails if the jobs cannot be listed.
    pub async fn find_jobs_completed_before(&self, time: DateTime<Utc>) -> OrtResult<Vec<Job>> {
        let jobs = self.gateway.list_jobs(&all_workers_selector()).await?;
        Ok(jobs
            .into_iter()
            .filter(|job| job.completed_before(time))
            .collect())
    }

    /// Returns all jobs of a worker, regardless of their state.
    ///
    /// # Errors
    ///
    /// Fails if the jobs cannot be listed.
    pub async fn find_jobs_for_worker(&self, worker: WorkerType) -> OrtResult<Vec<Job>> {
        self.gateway
            .list_jobs(&worker_selector(Endpoint::Worker(worker)))
            .await
    }

    /// Deletes a finished job, reporting it first if it failed.
    ///
    /// A failed job is only deleted once the orchestrator has been notified.
    /// If the notification fails, the job stays in the cluster and is picked
    /// up again once the de-duplication window has passed. Jobs processed
    /// within the window are ignored.
    pub async fn delete_and_notify_if_failed(&self, job: &Job) {
        let Some(job_name) = job.name() else {
            return;
        };

        if !self.recent.can_process(job_name) {
            debug!(job_name, "Job was processed recently, skipping");
            return;
        }

        let trace_id = job.trace_id();
        let span = run_span(Some(&trace_id), job.ort_run_id());

        async {
            if job.is_failed() {
                info!(job_name, "Detected a failed job");
                debug!(job_name, status = ?job.status, "Details of the failed job");

                if let Err(e) = self.notifier.send_failed_job_notification(job).await {
                    error!(job_name, error = %e, "Failed to notify about failed job");
                    MonitorMetrics::notification_failed("failed-job");
                    return;
                }
                MonitorMetrics::failed_job_reported();
            }

            self.delete_job(job_name).await;
        }
        .instrument(span)
        .await;
    }

    /// Deletes a job and all of its pods.
    ///
    /// Errors are logged and otherwise ignored; a failing pod deletion does not
    /// stop the deletion of the other pods.
    pub async fn delete_job(&self, job_name: &str) {
        match self.gateway.delete_job(job_name).await {
            Ok(()) => {
                info!(job_name, "Deleted job");
                MonitorMetrics::job_deleted();
            }
            Err(e) => error!(job_name, error = %e, "Could not remove job"),
        }

        let pods = match self.gateway.list_pods(&job_pods_selector(job_name)).await {
            Ok(pods) => pods,
            Err(e) => {
                error!(job_name, error = %e, "Could not list pods of job");
                return;
            }
        };

        let deletions = pods
            .iter()
            .filter_map(|pod| pod.metadata.name.as_deref())
            .map(|pod_name| async move {
                info!(pod_name, "Deleting pod");
                if let Err(e) = self.gateway.delete_pod(pod_name).await {
                    error!(pod_name, error = %e, "Could not remove pod");
                }
            });
        join_all(deletions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MockJobNotifier;
    use crate::testing::{at, job_pod, worker_job, JobStatusExt};
    use chrono::TimeDelta;
    use ort_core::{ManualClock, OrtError};
    use ort_transport::{GatewayOperation, InMemoryJobGateway};

    struct Fixture {
        gateway: Arc<InMemoryJobGateway>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                gateway: Arc::new(InMemoryJobGateway::new()),
                clock: Arc::new(ManualClock::new(at(1_000))),
            }
        }

        fn handler(&self, notifier: MockJobNotifier) -> JobHandler {
            JobHandler::new(
                self.gateway.clone(),
                Arc::new(notifier),
                RecentlyProcessedJobs::new(TimeDelta::seconds(60), self.clock.clone()),
            )
        }
    }

    fn job_names(jobs: &[Job]) -> Vec<&str> {
        let mut names: Vec<&str> = jobs.iter().filter_map(JobExt::name).collect();
        names.sort_unstable();
        names
    }

    #[tokio::test]
    async fn test_find_jobs_completed_before() {
        let fixture = Fixture::new();
        fixture.gateway.add_job(
            worker_job(WorkerType::Analyzer, "old", 1)
                .with_condition("Complete")
                .completed_at(at(10)),
        );
        fixture.gateway.add_job(
            worker_job(WorkerType::Scanner, "young", 2)
                .with_condition("Complete")
                .completed_at(at(900)),
        );
        fixture
            .gateway
            .add_job(worker_job(WorkerType::Config, "failed", 3).with_condition("Failed"));
        fixture
            .gateway
            .add_job(worker_job(WorkerType::Reporter, "running", 4).started_at(at(5)));

        let mut foreign = worker_job(WorkerType::Analyzer, "foreign", 5).with_condition("Failed");
        foreign.metadata.labels = None;
        foreign.metadata.name = Some("some-other-job".to_string());
        fixture.gateway.add_job(foreign);

        let handler = fixture.handler(MockJobNotifier::new());
        let jobs = handler.find_jobs_completed_before(at(500)).await.unwrap();

        assert_eq!(job_names(&jobs), vec!["analyzer-old", "config-failed"]);
    }

    #[tokio::test]
    async fn test_find_jobs_for_worker() {
        let fixture = Fixture::new();
        fixture.gateway.add_job(worker_job(WorkerType::Analyzer, "a", 1));
        fixture.gateway.add_job(worker_job(WorkerType::Analyzer, "b", 2));
        fixture.gateway.add_job(worker_job(WorkerType::Advisor, "c", 3));

        let handler = fixture.handler(MockJobNotifier::new());
        let jobs = handler.find_jobs_for_worker(WorkerType::Analyzer).await.unwrap();

        assert_eq!(job_names(&jobs), vec!["analyzer-a", "analyzer-b"]);
    }

    #[tokio::test]
    async fn test_failed_job_is_reported_and_deleted() {
        let fixture = Fixture::new();
        let job = worker_job(WorkerType::Analyzer, "abc123", 42).with_condition("Failed");
        fixture.gateway.add_job(job.clone());
        fixture.gateway.add_pod(job_pod("analyzer-abc123-x1", "analyzer-abc123"));

        let mut notifier = MockJobNotifier::new();
        notifier
            .expect_send_failed_job_notification()
            .withf(|job| job.name() == Some("analyzer-abc123"))
            .times(1)
            .returning(|_| Ok(()));

        let handler = fixture.handler(notifier);
        handler.delete_and_notify_if_failed(&job).await;

        assert_eq!(fixture.gateway.deleted_jobs(), vec!["analyzer-abc123"]);
        assert_eq!(fixture.gateway.deleted_pods(), vec!["analyzer-abc123-x1"]);
    }

    #[tokio::test]
    async fn test_successful_job_is_deleted_without_notification() {
        let fixture = Fixture::new();
        let job = worker_job(WorkerType::Scanner, "ok", 1)
            .with_condition("Complete")
            .completed_at(at(0));
        fixture.gateway.add_job(job.clone());

        let mut notifier = MockJobNotifier::new();
        notifier.expect_send_failed_job_notification().never();

        let handler = fixture.handler(notifier);
        handler.delete_and_notify_if_failed(&job).await;

        assert_eq!(fixture.gateway.deleted_jobs(), vec!["scanner-ok"]);
    }

    #[tokio::test]
    async fn test_failed_job_is_kept_when_notification_fails() {
        let fixture = Fixture::new();
        let job = worker_job(WorkerType::Analyzer, "abc", 1).with_condition("Failed");
        fixture.gateway.add_job(job.clone());

        let mut notifier = MockJobNotifier::new();
        notifier
            .expect_send_failed_job_notification()
            .times(2)
            .returning(|_| Err(OrtError::transport("unreachable")));

        let handler = fixture.handler(notifier);
        handler.delete_and_notify_if_failed(&job).await;
        assert!(fixture.gateway.deleted_jobs().is_empty());
        assert_eq!(fixture.gateway.jobs().len(), 1);

        fixture.clock.advance(TimeDelta::seconds(61));
        handler.delete_and_notify_if_failed(&job).await;
        assert!(fixture.gateway.deleted_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_recently_processed_job_is_skipped() {
        let fixture = Fixture::new();
        let job = worker_job(WorkerType::Analyzer, "abc", 1).with_condition("Failed");
        fixture.gateway.add_job(job.clone());

        let mut notifier = MockJobNotifier::new();
        notifier
            .expect_send_failed_job_notification()
            .times(1)
            .returning(|_| Ok(()));

        let handler = fixture.handler(notifier);
        handler.delete_and_notify_if_failed(&job).await;
        handler.delete_and_notify_if_failed(&job).await;

        assert_eq!(fixture.gateway.deleted_jobs(), vec!["analyzer-abc"]);
    }

    #[tokio::test]
    async fn test_job_without_name_is_ignored() {
        let fixture = Fixture::new();
        let mut job = worker_job(WorkerType::Analyzer, "abc", 1).with_condition("Failed");
        job.metadata.name = None;

        let mut notifier = MockJobNotifier::new();
        notifier.expect_send_failed_job_notification().never();

        fixture.handler(notifier).delete_and_notify_if_failed(&job).await;
        assert!(fixture.gateway.deleted_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_pod_deletion_failure_does_not_stop_other_pods() {
        let fixture = Fixture::new();
        fixture.gateway.add_job(worker_job(WorkerType::Evaluator, "e", 1));
        fixture.gateway.add_pod(job_pod("pod-1", "evaluator-e"));
        fixture.gateway.add_pod(job_pod("pod-2", "evaluator-e"));
        fixture.gateway.add_pod(job_pod("pod-3", "evaluator-e"));
        fixture.gateway.add_pod(job_pod("other", "evaluator-x"));
        fixture.gateway.fail_pod_deletion("pod-2");

        fixture
            .handler(MockJobNotifier::new())
            .delete_job("evaluator-e")
            .await;

        let mut deleted = fixture.gateway.deleted_pods();
        deleted.sort();
        assert_eq!(deleted, vec!["pod-1", "pod-3"]);
    }

    #[tokio::test]
    async fn test_pods_are_deleted_even_if_job_deletion_fails() {
        let fixture = Fixture::new();
        fixture.gateway.add_pod(job_pod("pod-1", "advisor-a"));
        fixture.gateway.fail(GatewayOperation::DeleteJob);

        fixture
            .handler(MockJobNotifier::new())
            .delete_job("advisor-a")
            .await;

        assert!(fixture.gateway.deleted_jobs().is_empty());
        assert_eq!(fixture.gateway.deleted_pods(), vec!["pod-1"]);
    }
}
