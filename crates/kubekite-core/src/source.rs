//! Source of CI jobs waiting for an agent.

use async_trait::async_trait;

use crate::{JobId, Result};

/// A CI system that can be polled for jobs ready to run.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Name of this source, used in logs.
    fn name(&self) -> &'static str;

    /// Identifiers of every job currently waiting for an agent.
    ///
    /// The same job keeps being returned until an agent picks it up, so
    /// callers must tolerate duplicates across polls.
    async fn scheduled_jobs(&self) -> Result<Vec<JobId>>;
}
