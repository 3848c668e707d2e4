//! Classification of cluster jobs.
//!
//! Only the status conditions and the labels written by the Kubernetes sender
//! are inspected; nothing here talks to the cluster.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use ort_core::WorkerType;
use ort_transport::labels::{trace_id_from_labels, RUN_ID_LABEL};

/// Condition type of a job that failed.
pub const FAILED_CONDITION: &str = "Failed";

/// Condition type of a job that completed normally.
pub const COMPLETE_CONDITION: &str = "Complete";

/// Queries on a cluster job.
pub trait JobExt {
    /// The name of the job.
    fn name(&self) -> Option<&str>;

    /// Whether the job has failed. Running jobs are not failed.
    fn is_failed(&self) -> bool;

    /// Whether the job has finished, successfully or not.
    fn is_completed(&self) -> bool;

    /// Whether the job was started before `threshold` and is still running.
    fn is_timeout(&self, threshold: DateTime<Utc>) -> bool;

    /// Whether the job finished before `time`.
    ///
    /// Failed jobs often have no completion time; they count as finished
    /// before any point in time so that they are handled right away.
    fn completed_before(&self, time: DateTime<Utc>) -> bool;

    /// The trace id reassembled from the chunk labels; empty if there are none.
    fn trace_id(&self) -> String;

    /// The id of the ORT run, if the label is present and numeric.
    fn ort_run_id(&self) -> Option<i64>;

    /// The worker type derived from the prefix of the job name.
    fn worker_type(&self) -> Option<WorkerType>;
}

fn has_condition(status: Option<&JobStatus>, condition_types: &[&str]) -> bool {
    status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| condition_types.contains(&c.type_.as_str()))
        })
}

impl JobExt for Job {
    fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    fn is_failed(&self) -> bool {
        has_condition(self.status.as_ref(), &[FAILED_CONDITION])
    }

    fn is_completed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.completion_time.is_some())
            || has_condition(
                self.status.as_ref(),
                &[COMPLETE_CONDITION, FAILED_CONDITION],
            )
    }

    fn is_timeout(&self, threshold: DateTime<Utc>) -> bool {
        !self.is_completed()
            && self
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .is_some_and(|start| start.0 < threshold)
    }

    fn completed_before(&self, time: DateTime<Utc>) -> bool {
        if !self.is_completed() {
            return false;
        }

        self.status
            .as_ref()
            .and_then(|s| s.completion_time.as_ref())
            .map_or(true, |completion| completion.0 < time)
    }

    fn trace_id(&self) -> String {
        self.metadata
            .labels
            .as_ref()
            .map(trace_id_from_labels)
            .unwrap_or_default()
    }

    fn ort_run_id(&self) -> Option<i64> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(RUN_ID_LABEL))
            .and_then(|value| value.parse().ok())
    }

    fn worker_type(&self) -> Option<WorkerType> {
        let name = self.name()?;
        let (prefix, _) = name.split_once('-')?;
        WorkerType::from_config_prefix(prefix)
    }
}
