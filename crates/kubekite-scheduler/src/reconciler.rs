//! Completion reconciler - reclaims Jobs whose agent has finished.
//!
//! Works purely from live cluster state: every cycle lists the pods in scope,
//! finds those whose agent container has terminated and deletes the owning Job
//! with foreground propagation. Nothing is remembered between cycles, so a
//! failed delete is simply retried on the next one.

use kubekite_config::ControllerConfig;
use kubekite_core::{Cluster, PropagationPolicy, Result, Scope};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one reconciliation cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs deleted this cycle.
    pub deleted: Vec<String>,
    /// Deletes that failed and will be retried next cycle.
    pub failed: usize,
}

pub struct Reconciler {
    cluster: Arc<dyn Cluster>,
    scope: Scope,
    agent_container: String,
    interval: Duration,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn Cluster>, config: &ControllerConfig) -> Self {
        Self {
            cluster,
            scope: config.scope.clone(),
            agent_container: config.agent_container.clone(),
            interval: config.cleanup_interval,
        }
    }

    /// Run reconciliation cycles until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            selector = %self.scope.label_selector(),
            "Job cleaner started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.reconcile_once() => match result {
                    Ok(report) if !report.deleted.is_empty() || report.failed > 0 => {
                        info!(deleted = report.deleted.len(), failed = report.failed, "Cleanup cycle finished");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Could not list pods"),
                },
            }
        }

        info!("Job cleaner stopped");
    }

    /// One pass over the pods in scope.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        debug!("Cleaning completed jobs");
        let namespace = &self.scope.namespace;
        let pods = self
            .cluster
            .list_pods(namespace, &self.scope.label_selector())
            .await?;

        let mut finished = BTreeSet::new();
        for pod in &pods {
            if !self.scope.matches(&pod.labels) {
                continue;
            }
            if !pod.container_terminated(&self.agent_container) {
                continue;
            }
            match pod.job_name() {
                Some(job_name) => {
                    finished.insert(job_name.to_string());
                }
                None => warn!(pod = %pod.name, "Finished pod has no job-name label, skipping"),
            }
        }

        let mut report = ReconcileReport::default();
        for job_name in finished {
            info!(job = %job_name, "Deleting job");
            match self
                .cluster
                .delete_job(namespace, &job_name, PropagationPolicy::Foreground)
                .await
            {
                Ok(()) => report.deleted.push(job_name),
                Err(e) if e.is_not_found() => {
                    debug!(job = %job_name, "Job already deleted");
                }
                Err(e) => {
                    error!(job = %job_name, error = %e, "Error deleting job");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
