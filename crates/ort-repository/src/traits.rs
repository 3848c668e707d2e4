//! Repository interfaces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ort_core::{OrtResult, WorkerType};
use std::sync::Arc;

use crate::{ActiveOrtRun, WorkerJob};

/// Jobs recorded for one worker type.
#[async_trait]
pub trait WorkerJobRepository: Send + Sync {
    /// Lists the jobs that are active and were created at or before `before`.
    async fn list_active(&self, before: DateTime<Utc>) -> OrtResult<Vec<WorkerJob>>;

    /// Returns the job of this worker type for a run, if one was created.
    async fn find_for_run(&self, ort_run_id: i64) -> OrtResult<Option<WorkerJob>>;
}

/// ORT runs.
#[async_trait]
pub trait OrtRunRepository: Send + Sync {
    /// Lists all runs that have not reached a final state.
    async fn list_active_runs(&self) -> OrtResult<Vec<ActiveOrtRun>>;

    /// Returns the trace id of a run, if the run exists and has one.
    async fn find_trace_id(&self, run_id: i64) -> OrtResult<Option<String>>;
}

/// One [`WorkerJobRepository`] per worker type that persists jobs.
#[derive(Clone)]
pub struct WorkerJobRepositories {
    pub analyzer: Arc<dyn WorkerJobRepository>,
    pub advisor: Arc<dyn WorkerJobRepository>,
    pub scanner: Arc<dyn WorkerJobRepository>,
    pub evaluator: Arc<dyn WorkerJobRepository>,
    pub reporter: Arc<dyn WorkerJobRepository>,
    pub notifier: Arc<dyn WorkerJobRepository>,
}

impl WorkerJobRepositories {
    /// Uses the same repository for every worker type.
    pub fn uniform(repository: Arc<dyn WorkerJobRepository>) -> Self {
        Self {
            analyzer: repository.clone(),
            advisor: repository.clone(),
            scanner: repository.clone(),
            evaluator: repository.clone(),
            reporter: repository.clone(),
            notifier: repository,
        }
    }

    /// Returns the repository of a worker type; `None` for workers without
    /// persisted jobs.
    #[must_use]
    pub fn for_worker(&self, worker: WorkerType) -> Option<&Arc<dyn WorkerJobRepository>> {
        match worker {
            WorkerType::Config => None,
            WorkerType::Analyzer => Some(&self.analyzer),
            WorkerType::Advisor => Some(&self.advisor),
            WorkerType::Scanner => Some(&self.scanner),
            WorkerType::Evaluator => Some(&self.evaluator),
            WorkerType::Reporter => Some(&self.reporter),
            WorkerType::Notifier => Some(&self.notifier),
        }
    }
}
