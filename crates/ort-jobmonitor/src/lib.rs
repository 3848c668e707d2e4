//! # ORT Job Monitor
//!
//! Keeps the worker jobs in the cluster consistent with the state of the ORT
//! runs in the database.
//!
//! # Components
//!
//! - [`JobHandler`]: queries and deletes jobs, notifies about failed ones
//! - [`RecentlyProcessedJobs`]: stops overlapping sweeps from handling a job twice
//! - [`FailedJobNotifier`]: reports failures and losses to the orchestrator
//! - [`Reaper`], [`LostJobsFinder`], [`LongRunningJobsFinder`],
//!   [`StuckJobsFinder`]: periodic sweeps
//! - [`JobMonitor`]: watches jobs and handles them as soon as they finish
//! - [`TaskScheduler`]: runs every enabled sweep on its own interval
//!
//! ```text
//!  Reaper ─────────────┐
//!  LostJobsFinder ─────┼──▶ JobHandler ──▶ ClusterJobGateway ──▶ cluster
//!  LongRunningJobs ────┤        │
//!  StuckJobsFinder ────┤        │
//!  JobMonitor (watch) ─┘        ▼
//!                        FailedJobNotifier ──▶ MessageSender ──▶ orchestrator
//! ```

pub mod classification;
pub mod handler;
pub mod metrics;
pub mod notifier;
pub mod recent;
pub mod scheduler;
pub mod tasks;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use classification::JobExt;
pub use handler::JobHandler;
pub use metrics::{register_metrics, MonitorMetrics};
pub use notifier::{FailedJobNotifier, JobNotifier};
pub use recent::RecentlyProcessedJobs;
pub use scheduler::{run_once, TaskScheduler};
pub use tasks::{LongRunningJobsFinder, LostJobsFinder, Reaper, StuckJobsFinder, Task};
pub use watcher::JobMonitor;
