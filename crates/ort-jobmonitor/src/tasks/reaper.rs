use async_trait::async_trait;
use chrono::TimeDelta;
use futures::stream::{self, StreamExt};
use ort_core::{Clock, OrtResult};
use std::sync::Arc;
use tracing::{debug, info};

use crate::recent::before;
use crate::{JobHandler, Task};

/// Removes finished jobs from the cluster and reports the failed ones.
pub struct Reaper {
    handler: Arc<JobHandler>,
    max_age: TimeDelta,
    concurrency: usize,
    clock: Arc<dyn Clock>,
}

impl Reaper {
    pub const NAME: &'static str = "reaper";

    /// Creates a Reaper removing jobs that finished more than `max_age` ago.
    #[must_use]
    pub fn new(
        handler: Arc<JobHandler>,
        max_age: TimeDelta,
        concurrency: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            handler,
            max_age,
            concurrency: concurrency.max(1),
            clock,
        }
    }
}

#[async_trait]
impl Task for Reaper {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self) -> OrtResult<()> {
        let threshold = before(self.clock.now(), self.max_age);
        debug!(threshold = %threshold, "Reaping completed jobs");

        let jobs = self.handler.find_jobs_completed_before(threshold).await?;
        info!(count = jobs.len(), "Found completed jobs to reap");

        let handler = &self.handler;
        stream::iter(jobs)
            .for_each_concurrent(self.concurrency, |job| async move {
                handler.delete_and_notify_if_failed(&job).await;
            })
            .await;

        Ok(())
    }
}
