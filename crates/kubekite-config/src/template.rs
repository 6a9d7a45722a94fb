//! Workload template loading.
//!
//! The template is a `batch/v1` Job manifest in YAML (or JSON, which is valid
//! YAML). It is read once at startup and never mutated; every launch works on
//! its own copy.

use crate::{ConfigError, ConfigResult};
use k8s_openapi::api::batch::v1::Job;
use std::path::Path;

/// Immutable Job template every launched workload is derived from.
#[derive(Debug, Clone)]
pub struct WorkloadTemplate {
    job: Job,
    agent_container: String,
}

impl WorkloadTemplate {
    /// Read and validate a template file.
    pub fn load(path: impl AsRef<Path>, agent_container: &str) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content, agent_container)
    }

    /// Parse and validate a template from manifest text.
    pub fn parse(manifest: &str, agent_container: &str) -> ConfigResult<Self> {
        let job: Job = serde_yaml::from_str(manifest)?;
        Self::from_job(job, agent_container)
    }

    /// Wrap an already-built Job, checking that it can run an agent.
    pub fn from_job(job: Job, agent_container: &str) -> ConfigResult<Self> {
        let pod_spec = job
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .ok_or_else(|| ConfigError::MissingField("spec.template.spec".to_string()))?;

        if pod_spec.containers.is_empty() {
            return Err(ConfigError::MissingField(
                "spec.template.spec.containers".to_string(),
            ));
        }

        if !pod_spec.containers.iter().any(|c| c.name == agent_container) {
            return Err(ConfigError::InvalidValue {
                field: "spec.template.spec.containers".to_string(),
                message: format!("no container named '{}'", agent_container),
            });
        }

        Ok(Self {
            job,
            agent_container: agent_container.to_string(),
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Name of the container that runs the agent.
    pub fn agent_container(&self) -> &str {
        &self.agent_container
    }

    /// A private copy of the template for one launch.
    pub fn instantiate(&self) -> Job {
        self.job.clone()
    }
}
