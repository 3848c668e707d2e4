//! Interval scheduling of the reconciliation sweeps.

use futures::future::join_all;
use ort_core::{OrtError, OrtResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{MonitorMetrics, Task};

/// Runs a task once, logging and recording its outcome.
///
/// Returns whether the task succeeded.
pub async fn run_task(task: &dyn Task) -> bool {
    let started = Instant::now();
    let result = task.execute().await;
    let elapsed = started.elapsed();

    MonitorMetrics::task_executed(task.name(), result.is_ok(), elapsed);

    match result {
        Ok(()) => {
            debug!(task = task.name(), elapsed_ms = elapsed.as_millis(), "Task completed");
            true
        }
        Err(e) => {
            error!(task = task.name(), error = %e, "Task failed");
            false
        }
    }
}

/// Runs the given tasks once, concurrently.
///
/// Returns whether all of them succeeded.
pub async fn run_once(tasks: &[Arc<dyn Task>]) -> bool {
    info!(
        tasks = ?tasks.iter().map(|t| t.name()).collect::<Vec<_>>(),
        "Running tasks"
    );

    join_all(tasks.iter().map(|task| run_task(task.as_ref())))
        .await
        .into_iter()
        .all(|succeeded| succeeded)
}

struct ScheduledTask {
    task: Arc<dyn Task>,
    period: Duration,
}

/// Runs every registered task on its own interval.
///
/// Tasks are independent of each other: a slow or failing task delays only
/// its own next run. Ticks missed while a run takes longer than its period
/// are skipped.
pub struct TaskScheduler {
    tasks: Vec<ScheduledTask>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Vec::new(),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a task to run every `period`.
    pub fn schedule(&mut self, task: Arc<dyn Task>, period: Duration) {
        info!(task = task.name(), period_secs = period.as_secs(), "Scheduled task");
        self.tasks.push(ScheduledTask { task, period });
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// A receiver that is notified when the scheduler stops. Other loops,
    /// such as the job watcher, use it to stop together with the sweeps.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns one loop per registered task.
    ///
    /// # Errors
    ///
    /// Fails if the scheduler is already running.
    pub fn start(&self) -> OrtResult<Vec<JoinHandle<()>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrtError::internal("Scheduler already running"));
        }

        info!(tasks = self.tasks.len(), "Starting scheduler");

        Ok(self
            .tasks
            .iter()
            .map(|scheduled| {
                tokio::spawn(run_periodically(
                    scheduled.task.clone(),
                    scheduled.period,
                    self.shutdown_tx.subscribe(),
                ))
            })
            .collect())
    }

    /// Signals all loops to stop after their current run.
    pub fn stop(&self) {
        info!("Stopping scheduler...");
        let _ = self.shutdown_tx.send(());
        self.running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn run_periodically(
    task: Arc<dyn Task>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = task.name(), "Task loop stopped");
                break;
            }

            _ = ticker.tick() => {
                run_task(task.as_ref()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingTask {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                fail,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Task for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self) -> OrtResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(OrtError::kubernetes("cluster unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_on_their_interval() {
        let fast = CountingTask::new(false);
        let slow = CountingTask::new(false);

        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(fast.clone(), Duration::from_secs(10));
        scheduler.schedule(slow.clone(), Duration::from_secs(60));
        assert_eq!(scheduler.len(), 2);

        let handles = scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        scheduler.stop();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(fast.runs(), 3);
        assert_eq!(slow.runs(), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_keeps_running() {
        let failing = CountingTask::new(true);

        let mut scheduler = TaskScheduler::new();
        scheduler.schedule(failing.clone(), Duration::from_secs(10));

        let handles = scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        scheduler.stop();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(failing.runs(), 4);
    }

    #[tokio::test]
    async fn test_scheduler_cannot_be_started_twice() {
        let scheduler = TaskScheduler::new();
        let _handles = scheduler.start().unwrap();

        assert!(scheduler.start().is_err());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_run_once_reports_failures() {
        let ok = CountingTask::new(false);
        let failing = CountingTask::new(true);

        assert!(run_once(&[ok.clone() as Arc<dyn Task>]).await);
        assert!(!run_once(&[ok.clone() as Arc<dyn Task>, failing.clone() as Arc<dyn Task>]).await);
        assert_eq!(ok.runs(), 2);
        assert_eq!(failing.runs(), 1);
    }
}
