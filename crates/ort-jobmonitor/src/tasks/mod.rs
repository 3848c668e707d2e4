//! Reconciliation sweeps.
//!
//! Each sweep is a [`Task`] that can be run on its own schedule or once from
//! the task runner. Sweeps share no state apart from the [`JobHandler`] and its
//! de-duplication guard, so any interleaving of them is safe.
//!
//! [`JobHandler`]: crate::JobHandler

mod long_running;
mod lost_jobs;
mod reaper;
mod stuck_jobs;

pub use long_running::LongRunningJobsFinder;
pub use lost_jobs::LostJobsFinder;
pub use reaper::Reaper;
pub use stuck_jobs::StuckJobsFinder;

use async_trait::async_trait;
use ort_core::OrtResult;

/// A unit of reconciliation work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Name used in logs, metrics and the task runner configuration.
    fn name(&self) -> &'static str;

    /// Performs one sweep. Errors are logged by the caller.
    async fn execute(&self) -> OrtResult<()>;
}
