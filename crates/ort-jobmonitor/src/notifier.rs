//! Notifications to the orchestrator about failed and lost work.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use ort_core::{OrtResult, WorkerType};
use ort_repository::ActiveOrtRun;
use ort_transport::{Message, MessageHeader, MessageSender, OrchestratorMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::JobExt;

/// Reports problems detected by the monitor to the orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobNotifier: Send + Sync {
    /// Reports a failed job. Jobs that cannot be attributed to a worker, a
    /// trace and a run are skipped.
    async fn send_failed_job_notification(&self, job: &Job) -> OrtResult<()>;

    /// Reports a persisted job that has no counterpart in the cluster.
    async fn send_lost_job_notification(&self, ort_run_id: i64, worker: WorkerType)
        -> OrtResult<()>;

    /// Reports an active run for which nothing is scheduled anymore.
    async fn send_lost_schedule_notification(&self, run: &ActiveOrtRun) -> OrtResult<()>;

    /// Reports an active run whose jobs have all finished.
    async fn send_stuck_jobs_notification(&self, run: &ActiveOrtRun) -> OrtResult<()>;
}

/// [`JobNotifier`] sending [`OrchestratorMessage`]s through a [`MessageSender`].
pub struct FailedJobNotifier {
    sender: Arc<dyn MessageSender<OrchestratorMessage>>,
}

impl FailedJobNotifier {
    #[must_use]
    pub fn new(sender: Arc<dyn MessageSender<OrchestratorMessage>>) -> Self {
        Self { sender }
    }

    fn worker_error(worker: WorkerType) -> OrchestratorMessage {
        OrchestratorMessage::WorkerError {
            endpoint_name: worker.config_prefix().to_string(),
        }
    }
}

#[async_trait]
impl JobNotifier for FailedJobNotifier {
    async fn send_failed_job_notification(&self, job: &Job) -> OrtResult<()> {
        let job_name = job.name().unwrap_or_default();

        let Some(worker) = job.worker_type() else {
            warn!(job_name, "Cannot determine the worker of the failed job");
            return Ok(());
        };

        let trace_id = job.trace_id();
        if trace_id.is_empty() {
            warn!(job_name, "Failed job has no trace id");
            return Ok(());
        }

        let Some(ort_run_id) = job.ort_run_id() else {
            warn!(job_name, "Failed job has no run id");
            return Ok(());
        };

        info!(job_name, worker = %worker, "Sending notification about failed job");

        self.sender
            .send(Message::new(
                MessageHeader::new(trace_id, ort_run_id),
                Self::worker_error(worker),
            ))
            .await
    }

    async fn send_lost_job_notification(
        &self,
        ort_run_id: i64,
        worker: WorkerType,
    ) -> OrtResult<()> {
        info!(ort_run_id, worker = %worker, "Sending notification about lost job");

        self.sender
            .send(Message::new(
                MessageHeader::new("", ort_run_id),
                Self::worker_error(worker),
            ))
            .await
    }

    async fn send_lost_schedule_notification(&self, run: &ActiveOrtRun) -> OrtResult<()> {
        debug!(ort_run_id = run.run_id, "Sending notification about lost schedule");

        self.sender
            .send(Message::new(
                MessageHeader::new(run.trace_id.clone(), run.run_id),
                OrchestratorMessage::LostSchedule {
                    ort_run_id: run.run_id,
                },
            ))
            .await
    }

    async fn send_stuck_jobs_notification(&self, run: &ActiveOrtRun) -> OrtResult<()> {
        info!(ort_run_id = run.run_id, "Sending notification about stuck run");

        self.sender
            .send(Message::new(
                MessageHeader::new(run.trace_id.clone(), run.run_id),
                OrchestratorMessage::StuckJobs {
                    ort_run_id: run.run_id,
                },
            ))
            .await
    }
}
