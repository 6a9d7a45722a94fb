//! Buildkite REST API client.

use async_trait::async_trait;
use kubekite_core::{Error, JobId, JobSource, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.buildkite.com/v2";

/// Job state Buildkite reports while a job waits for an agent.
const SCHEDULED: &str = "scheduled";

/// Buildkite API client scoped to one pipeline.
pub struct BuildkiteClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    org: String,
    pipeline: String,
}

impl BuildkiteClient {
    pub fn new(
        access_token: impl Into<String>,
        org: impl Into<String>,
        pipeline: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("kubekite");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_API_URL.to_string(),
            access_token: access_token.into(),
            org: org.into(),
            pipeline: pipeline.into(),
        })
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn builds_url(&self) -> String {
        format!(
            "{}/organizations/{}/pipelines/{}/builds?state[]=scheduled&state[]=running",
            self.base_url,
            urlencoding::encode(&self.org),
            urlencoding::encode(&self.pipeline)
        )
    }

    /// List the pipeline's builds that may still have jobs waiting to start.
    pub async fn list_builds(&self) -> Result<Vec<Build>> {
        let response = self
            .client
            .get(self.builds_url())
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(e.to_string())
                } else {
                    Error::Api(format!("request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "failed to list builds ({}): {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Api(format!("invalid builds response: {}", e)))
    }
}

#[async_trait]
impl JobSource for BuildkiteClient {
    fn name(&self) -> &'static str {
        "buildkite"
    }

    async fn scheduled_jobs(&self) -> Result<Vec<JobId>> {
        let builds = self.list_builds().await?;
        let jobs = scheduled_job_ids(&builds);
        debug!(
            builds = builds.len(),
            scheduled = jobs.len(),
            "Fetched builds from Buildkite"
        );
        Ok(jobs)
    }
}

/// Identifiers of every job in `builds` that is waiting for an agent.
pub fn scheduled_job_ids(builds: &[Build]) -> Vec<JobId> {
    builds
        .iter()
        .flat_map(|build| build.jobs.iter())
        .filter(|job| job.state.as_deref() == Some(SCHEDULED))
        .map(|job| JobId::new(job.id.clone()))
        .collect()
}

/// A Buildkite build, reduced to what the controller needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub number: Option<u64>,
    pub state: Option<String>,
    #[serde(default)]
    pub jobs: Vec<BuildkiteJob>,
}

/// A job inside a build. Waiter and block steps have no state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildkiteJob {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub state: Option<String>,
}
