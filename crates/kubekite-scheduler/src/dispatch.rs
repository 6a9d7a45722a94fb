//! Dispatch loop - feeds job ids from the queue watcher to the launcher.

use crate::launcher::Launcher;
use kubekite_core::JobId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Lifecycle of the dispatch loop. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Running,
    Stopped,
}

/// Launches jobs one at a time, in arrival order.
///
/// Each launch runs on a tracked task so that cancellation can stop the loop
/// immediately while the launch itself is allowed to finish, bounded by the
/// shutdown timeout.
pub struct Dispatcher {
    launcher: Arc<Launcher>,
    tracker: TaskTracker,
    shutdown_timeout: Duration,
}

impl Dispatcher {
    pub fn new(launcher: Arc<Launcher>, shutdown_timeout: Duration) -> Self {
        Self {
            launcher,
            tracker: TaskTracker::new(),
            shutdown_timeout,
        }
    }

    /// Consume job ids until cancelled or the channel closes.
    pub async fn run(
        &self,
        mut jobs: mpsc::Receiver<JobId>,
        cancel: CancellationToken,
    ) -> DispatchState {
        let mut state = DispatchState::Running;
        info!("Job processor started");

        while state == DispatchState::Running {
            let id = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation request received, stopping job processor");
                    state = DispatchState::Stopped;
                    continue;
                }
                next = jobs.recv() => match next {
                    Some(id) => id,
                    None => {
                        info!("Job stream closed, stopping job processor");
                        state = DispatchState::Stopped;
                        continue;
                    }
                },
            };

            let launcher = Arc::clone(&self.launcher);
            let launch = self.tracker.spawn(async move {
                match launcher.launch(&id).await {
                    Ok(outcome) => debug!(job_id = %id, ?outcome, "Launch finished"),
                    Err(e) => error!(job_id = %id, error = %e, "Error launching job"),
                }
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation request received during launch, stopping job processor");
                    state = DispatchState::Stopped;
                }
                result = launch => {
                    if let Err(e) = result {
                        warn!(error = %e, "Launch task failed");
                    }
                }
            }
        }

        self.drain().await;
        state
    }

    /// Wait for launches still in flight, up to the shutdown timeout.
    async fn drain(&self) {
        self.tracker.close();
        if self.tracker.is_empty() {
            return;
        }

        info!(in_flight = self.tracker.len(), "Waiting for in-flight launches");
        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tracker.len(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Shutdown timeout elapsed with launches still in flight"
            );
        }
    }
}
