//! Cluster trait and pod status types.
//!
//! The cluster holds the workload resources (batch `Job`s) launched for CI
//! jobs and the pods they generate. The launcher and reconciler only talk to
//! it through [`Cluster`], which keeps both testable without an API server.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::scope::JOB_NAME_LABEL;

/// How dependents of a deleted resource are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    /// Dependents are removed before the owner is reported deleted.
    Foreground,
    /// The owner is removed immediately; dependents are collected later.
    Background,
    /// Dependents are left behind.
    Orphan,
}

/// State of a single container inside a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerPhase {
    Waiting,
    Running,
    Terminated { exit_code: i32 },
    Unknown,
}

impl ContainerPhase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, ContainerPhase::Terminated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub phase: ContainerPhase,
}

/// The subset of a pod's metadata and status the reconciler needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// Name of the Job that owns this pod, taken from its `job-name` label.
    pub fn job_name(&self) -> Option<&str> {
        self.labels.get(JOB_NAME_LABEL).map(String::as_str)
    }

    /// Whether the named container has terminated, regardless of exit code.
    pub fn container_terminated(&self, container: &str) -> bool {
        self.containers
            .iter()
            .any(|c| c.name == container && c.phase.is_terminated())
    }
}

/// Operations the controller performs against the cluster API.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fetch a Job by name. Returns `Ok(None)` when it does not exist.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Create a Job. A name collision is reported as [`crate::Error::Conflict`].
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// List pods matching a label selector.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSnapshot>>;

    /// Delete a Job. A missing Job is reported as [`crate::Error::NotFound`].
    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<()>;
}
