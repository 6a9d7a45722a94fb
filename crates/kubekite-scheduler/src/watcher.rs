//! Queue watcher - polls the CI system for jobs waiting on an agent.

use kubekite_core::{JobId, JobSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Polls a [`JobSource`] on a fixed interval and emits every scheduled job id.
///
/// The output channel is bounded. When it is full the watcher waits for room
/// rather than dropping ids; the wait still yields to cancellation.
pub struct QueueWatcher {
    source: Arc<dyn JobSource>,
    interval: Duration,
}

impl QueueWatcher {
    pub fn new(source: Arc<dyn JobSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Poll until cancelled or until the receiving side goes away.
    pub async fn run(&self, jobs: mpsc::Sender<JobId>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            source = self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Job watcher started"
        );

        'poll: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!(source = self.source.name(), "Checking for scheduled jobs");
            let scheduled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.source.scheduled_jobs() => result,
            };

            let ids = match scheduled {
                Ok(ids) => ids,
                Err(e) => {
                    error!(source = self.source.name(), error = %e, "Error fetching scheduled jobs");
                    continue;
                }
            };

            for id in ids {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'poll,
                    sent = jobs.send(id) => {
                        if sent.is_err() {
                            info!("Job processor gone, stopping job watcher");
                            break 'poll;
                        }
                    }
                }
            }
        }

        info!("Job watcher stopped");
    }
}
