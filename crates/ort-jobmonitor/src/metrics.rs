//! Prometheus metrics of the job monitor.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use ort_core::WorkerType;
use std::time::Duration;

/// Metric names of the job monitor.
pub mod names {
    /// Total sweep executions.
    pub const TASK_RUNS_TOTAL: &str = "ort_jobmonitor_task_runs_total";
    /// Total sweep executions that returned an error.
    pub const TASK_FAILURES_TOTAL: &str = "ort_jobmonitor_task_failures_total";
    /// Duration of a sweep in seconds.
    pub const TASK_DURATION_SECONDS: &str = "ort_jobmonitor_task_duration_seconds";

    /// Total jobs deleted from the cluster.
    pub const JOBS_DELETED_TOTAL: &str = "ort_jobmonitor_jobs_deleted_total";
    /// Total failed jobs reported to the orchestrator.
    pub const FAILED_JOBS_TOTAL: &str = "ort_jobmonitor_failed_jobs_total";
    /// Total notifications that could not be sent.
    pub const NOTIFICATION_FAILURES_TOTAL: &str = "ort_jobmonitor_notification_failures_total";
    /// Total lost jobs detected.
    pub const LOST_JOBS_TOTAL: &str = "ort_jobmonitor_lost_jobs_total";
    /// Total runs with lost schedules detected.
    pub const LOST_SCHEDULES_TOTAL: &str = "ort_jobmonitor_lost_schedules_total";
    /// Total runs detected with all jobs finished.
    pub const STUCK_RUNS_TOTAL: &str = "ort_jobmonitor_stuck_runs_total";
    /// Total long-running jobs terminated.
    pub const LONG_RUNNING_JOBS_TOTAL: &str = "ort_jobmonitor_long_running_jobs_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::TASK_RUNS_TOTAL, "Total number of sweep executions");
    describe_counter!(
        names::TASK_FAILURES_TOTAL,
        "Total number of sweep executions that failed"
    );
    describe_histogram!(
        names::TASK_DURATION_SECONDS,
        "Sweep execution duration in seconds"
    );

    describe_counter!(
        names::JOBS_DELETED_TOTAL,
        "Total number of jobs deleted from the cluster"
    );
    describe_counter!(
        names::FAILED_JOBS_TOTAL,
        "Total number of failed jobs reported to the orchestrator"
    );
    describe_counter!(
        names::NOTIFICATION_FAILURES_TOTAL,
        "Total number of notifications that could not be sent"
    );
    describe_counter!(names::LOST_JOBS_TOTAL, "Total number of lost jobs detected");
    describe_counter!(
        names::LOST_SCHEDULES_TOTAL,
        "Total number of runs with lost schedules detected"
    );
    describe_counter!(
        names::STUCK_RUNS_TOTAL,
        "Total number of active runs detected with all jobs finished"
    );
    describe_counter!(
        names::LONG_RUNNING_JOBS_TOTAL,
        "Total number of long-running jobs terminated"
    );
}

/// Job monitor metrics recorder.
#[derive(Clone)]
pub struct MonitorMetrics;

impl MonitorMetrics {
    /// Record a finished sweep.
    pub fn task_executed(task: &'static str, succeeded: bool, duration: Duration) {
        counter!(names::TASK_RUNS_TOTAL, "task" => task).increment(1);
        if !succeeded {
            counter!(names::TASK_FAILURES_TOTAL, "task" => task).increment(1);
        }

        histogram!(
            names::TASK_DURATION_SECONDS,
            "task" => task,
            "status" => if succeeded { "succeeded" } else { "failed" }
        )
        .record(duration.as_secs_f64());
    }

    /// Record a deleted job.
    pub fn job_deleted() {
        counter!(names::JOBS_DELETED_TOTAL).increment(1);
    }

    /// Record a failed job that was reported.
    pub fn failed_job_reported() {
        counter!(names::FAILED_JOBS_TOTAL).increment(1);
    }

    /// Record a notification that could not be sent.
    pub fn notification_failed(kind: &'static str) {
        counter!(names::NOTIFICATION_FAILURES_TOTAL, "kind" => kind).increment(1);
    }

    /// Record a lost job.
    pub fn lost_job(worker: WorkerType) {
        counter!(names::LOST_JOBS_TOTAL, "worker" => worker.config_prefix()).increment(1);
    }

    /// Record a run with a lost schedule.
    pub fn lost_schedule() {
        counter!(names::LOST_SCHEDULES_TOTAL).increment(1);
    }

    /// Record a run whose jobs have all finished.
    pub fn stuck_run() {
        counter!(names::STUCK_RUNS_TOTAL).increment(1);
    }

    /// Record a terminated long-running job.
    pub fn long_running_job(worker: WorkerType) {
        counter!(names::LONG_RUNNING_JOBS_TOTAL, "worker" => worker.config_prefix())
            .increment(1);
    }
}
