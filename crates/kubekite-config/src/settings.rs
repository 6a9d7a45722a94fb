//! Controller settings.

use crate::{ConfigError, ConfigResult};
use kubekite_core::Scope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of every Job name; the CI job identifier is appended to it.
pub const DEFAULT_JOB_NAME_PREFIX: &str = "buildkite-agent-";
/// Container whose termination marks a Job as finished.
pub const DEFAULT_AGENT_CONTAINER: &str = "buildkite-agent";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Longest value the API server accepts for a label.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub scope: Scope,
    /// Prefix of every Job name.
    pub job_name_prefix: String,
    /// Name of the agent container inside the template.
    pub agent_container: String,
    /// How often the CI system is polled for scheduled jobs.
    pub poll_interval: Duration,
    /// How often finished Jobs are reclaimed.
    pub cleanup_interval: Duration,
    /// Per-request timeout for API calls. `None` disables it.
    pub api_timeout: Option<Duration>,
    /// Upper bound on waiting for an in-flight launch during shutdown.
    pub shutdown_timeout: Duration,
    /// Capacity of the buffer between the queue watcher and the dispatch loop.
    pub channel_capacity: usize,
}

impl ControllerConfig {
    /// Settings for `scope` with every other field at its default.
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            job_name_prefix: DEFAULT_JOB_NAME_PREFIX.to_string(),
            agent_container: DEFAULT_AGENT_CONTAINER.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            api_timeout: Some(DEFAULT_API_TIMEOUT),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Check the settings before any loop starts.
    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("org", &self.scope.org),
            ("pipeline", &self.scope.pipeline),
            ("namespace", &self.scope.namespace),
            ("agent_container", &self.agent_container),
            ("job_name_prefix", &self.job_name_prefix),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }

        // Org and pipeline become label values on every Job and in the selector.
        for (field, value) in [
            ("org", &self.scope.org),
            ("pipeline", &self.scope.pipeline),
        ] {
            if !is_label_value(value) {
                return Err(invalid(
                    field,
                    "must be a valid label value: at most 63 characters from [A-Za-z0-9._-], \
                     starting and ending with an alphanumeric",
                ));
            }
        }

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be greater than zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup_interval", "must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "must be greater than zero"));
        }

        Ok(())
    }
}

fn is_label_value(value: &str) -> bool {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let valid_edges = value
        .chars()
        .next()
        .zip(value.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    value.len() <= MAX_LABEL_VALUE_LEN && valid_chars && valid_edges
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
