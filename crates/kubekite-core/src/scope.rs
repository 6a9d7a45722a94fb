//! Controller scope and the labels derived from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label marking a resource as owned by kubekite.
pub const MANAGED_BY_LABEL: &str = "managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "kubekite";
pub const ORG_LABEL: &str = "org";
pub const PIPELINE_LABEL: &str = "pipeline";
/// Label the Job controller puts on every pod it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

/// The (org, pipeline, namespace) triple a controller instance works in.
///
/// Fixed at startup. Two controllers may share a namespace as long as their
/// org or pipeline differ, since every label filter is derived from this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub org: String,
    pub pipeline: String,
    pub namespace: String,
}

impl Scope {
    pub fn new(
        org: impl Into<String>,
        pipeline: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            pipeline: pipeline.into(),
            namespace: namespace.into(),
        }
    }

    /// Labels stamped on every Job and pod template this controller creates.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (ORG_LABEL.to_string(), self.org.clone()),
            (PIPELINE_LABEL.to_string(), self.pipeline.clone()),
        ])
    }

    /// Label selector matching exactly the resources of this scope.
    pub fn label_selector(&self) -> String {
        format!(
            "{}={},{}={},{}={}",
            MANAGED_BY_LABEL,
            MANAGED_BY_VALUE,
            ORG_LABEL,
            self.org,
            PIPELINE_LABEL,
            self.pipeline
        )
    }

    /// Whether `labels` carry all three scope labels with this scope's values.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels()
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}
