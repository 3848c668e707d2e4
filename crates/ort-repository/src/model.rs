//! Persisted records read by the job monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job of a worker as recorded in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub id: i64,
    pub ort_run_id: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkerJob {
    /// A job is active once started and until finished.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    /// A job is finished once it has a completion time, whatever its outcome.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A run that has not reached a final state yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveOrtRun {
    pub run_id: i64,
    pub created_at: DateTime<Utc>,
    pub trace_id: String,
}
