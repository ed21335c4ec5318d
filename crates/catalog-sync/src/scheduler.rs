use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Reconciler, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay measured from the end of one cycle to the start of the next.
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl SchedulerConfig {
    pub fn new(interval: Duration, initial_delay: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            initial_delay,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::ZERO)
    }
}

/// Fixed-delay timer around a [`Reconciler`]. Cycles never overlap: the next delay only starts
/// once the previous cycle has returned, whatever its outcome.
pub struct Scheduler;

/// Owns the running schedule. Dropping the handle without calling [`SchedulerHandle::stop`]
/// closes the shutdown channel and ends the schedule after the current delay or cycle.
#[must_use = "dropping the handle stops the schedule"]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(reconciler: Arc<Reconciler>, config: SchedulerConfig) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        info!(
            interval_secs = config.interval.as_secs(),
            initial_delay_secs = config.initial_delay.as_secs(),
            "product sync scheduler started"
        );

        let task = tokio::spawn(async move {
            let mut delay = config.initial_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => break,
                }
                match reconciler.run_cycle().await {
                    SyncOutcome::Completed(report) => {
                        debug!(run_id = %report.run_id, "scheduled cycle completed")
                    }
                    SyncOutcome::Failed { run_id, .. } => {
                        debug!(%run_id, "scheduled cycle failed; retrying next tick")
                    }
                    SyncOutcome::Skipped => debug!("scheduled cycle skipped"),
                }
                delay = config.interval;
            }
            info!("product sync scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

impl SchedulerHandle {
    /// Stops the timer. A cycle already in progress is allowed to finish first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
