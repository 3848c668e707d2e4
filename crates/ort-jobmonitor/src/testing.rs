//! Builders and fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use ort_core::{OrtError, OrtResult, WorkerType};
use ort_repository::{ActiveOrtRun, OrtRunRepository, WorkerJob, WorkerJobRepository};
use ort_transport::labels::{self, JOB_NAME_LABEL, RUN_ID_LABEL, WORKER_LABEL};
use ort_transport::{Endpoint, Message, MessageSender, OrchestratorMessage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// A fixed point in time plus the given number of seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A job as created by the Kubernetes sender.
pub fn worker_job(worker: WorkerType, trace_id: &str, run_id: i64) -> Job {
    let mut job_labels = labels::trace_id_labels(trace_id);
    job_labels.insert(RUN_ID_LABEL.to_string(), run_id.to_string());
    job_labels.insert(WORKER_LABEL.to_string(), worker.config_prefix().to_string());

    let mut job = Job::default();
    job.metadata.name = Some(labels::job_name(Endpoint::Worker(worker), trace_id));
    job.metadata.labels = Some(job_labels);
    job
}

/// A pod belonging to a job.
pub fn job_pod(name: &str, job_name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.labels = Some(BTreeMap::from([(
        JOB_NAME_LABEL.to_string(),
        job_name.to_string(),
    )]));
    pod
}

/// Status modifications of test jobs.
pub trait JobStatusExt {
    fn started_at(self, time: DateTime<Utc>) -> Self;
    fn completed_at(self, time: DateTime<Utc>) -> Self;
    fn with_condition(self, condition_type: &str) -> Self;
}

impl JobStatusExt for Job {
    fn started_at(mut self, time: DateTime<Utc>) -> Self {
        self.status.get_or_insert_with(JobStatus::default).start_time = Some(Time(time));
        self
    }

    fn completed_at(mut self, time: DateTime<Utc>) -> Self {
        self.status.get_or_insert_with(JobStatus::default).completion_time = Some(Time(time));
        self
    }

    fn with_condition(mut self, condition_type: &str) -> Self {
        self.status
            .get_or_insert_with(JobStatus::default)
            .conditions
            .get_or_insert_with(Vec::new)
            .push(JobCondition {
                type_: condition_type.to_string(),
                status: "True".to_string(),
                ..JobCondition::default()
            });
        self
    }
}

/// An active persisted job.
pub fn active_job(ort_run_id: i64, created_at: DateTime<Utc>) -> WorkerJob {
    WorkerJob {
        id: ort_run_id,
        ort_run_id,
        created_at,
        started_at: Some(created_at),
        finished_at: None,
    }
}

/// A persisted job of a run that has finished or is still running.
pub fn run_job(ort_run_id: i64, finished: bool) -> WorkerJob {
    WorkerJob {
        finished_at: finished.then(|| at(0)),
        ..active_job(ort_run_id, at(0))
    }
}

/// Sender recording the messages it is asked to send.
#[derive(Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<Message<OrchestratorMessage>>>,
    failing: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Message<OrchestratorMessage>> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl MessageSender<OrchestratorMessage> for RecordingSender {
    fn endpoint(&self) -> Endpoint {
        Endpoint::Orchestrator
    }

    async fn send(&self, message: Message<OrchestratorMessage>) -> OrtResult<()> {
        if self.failing {
            return Err(OrtError::transport("orchestrator unreachable"));
        }
        self.messages.lock().push(message);
        Ok(())
    }
}

/// Repository returning a fixed list of persisted jobs.
#[derive(Default)]
pub struct FakeWorkerJobRepository {
    jobs: Vec<WorkerJob>,
    failing: bool,
}

impl FakeWorkerJobRepository {
    pub fn with_jobs(jobs: Vec<WorkerJob>) -> Self {
        Self {
            jobs,
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            jobs: Vec::new(),
            failing: true,
        }
    }
}

#[async_trait]
impl WorkerJobRepository for FakeWorkerJobRepository {
    async fn list_active(&self, before: DateTime<Utc>) -> OrtResult<Vec<WorkerJob>> {
        if self.failing {
            return Err(OrtError::Database("connection refused".to_string()));
        }
        Ok(self
            .jobs
            .iter()
            .filter(|job| job.is_active() && job.created_at <= before)
            .cloned()
            .collect())
    }

    async fn find_for_run(&self, ort_run_id: i64) -> OrtResult<Option<WorkerJob>> {
        if self.failing {
            return Err(OrtError::Database("connection refused".to_string()));
        }
        Ok(self
            .jobs
            .iter()
            .find(|job| job.ort_run_id == ort_run_id)
            .cloned())
    }
}

/// Repository returning a fixed list of active runs.
#[derive(Default)]
pub struct FakeOrtRunRepository {
    runs: Vec<ActiveOrtRun>,
    trace_ids: HashMap<i64, String>,
}

impl FakeOrtRunRepository {
    pub fn with_runs(runs: Vec<ActiveOrtRun>) -> Self {
        let trace_ids = runs
            .iter()
            .map(|run| (run.run_id, run.trace_id.clone()))
            .collect();
        Self { runs, trace_ids }
    }
}

#[async_trait]
impl OrtRunRepository for FakeOrtRunRepository {
    async fn list_active_runs(&self) -> OrtResult<Vec<ActiveOrtRun>> {
        Ok(self.runs.clone())
    }

    async fn find_trace_id(&self, run_id: i64) -> OrtResult<Option<String>> {
        Ok(self.trace_ids.get(&run_id).cloned())
    }
}
