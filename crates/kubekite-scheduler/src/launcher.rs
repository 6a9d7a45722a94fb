//! Job registry and launcher.
//!
//! The launcher owns the registry of Jobs this process has created and is the
//! only writer to it. The registry is bookkeeping only; whether a Job exists is
//! always decided by the cluster. Launching is idempotent per CI job id as long
//! as nothing deletes the Job in between:
//! - a launch already running for the same id turns the second call into a no-op
//! - an existing Job with the derived name (e.g. from before a restart) is left alone
//! - a `409 Conflict` on create means another creator won, and is not an error
//!
//! Once the reconciler has removed a Job, a CI job still reported as scheduled
//! is launched again.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::EnvVar;
use kubekite_config::{ControllerConfig, WorkloadTemplate};
use kubekite_core::{Cluster, Error, JobId, Result, Scope};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable telling the agent which job to acquire.
pub const ACQUIRE_JOB_ENV: &str = "BUILDKITE_AGENT_ACQUIRE_JOB";

/// Longest name the API server accepts for a Job.
const MAX_NAME_LEN: usize = 63;

/// What a call to [`Launcher::launch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A new Job was created.
    Launched,
    /// A Job for this id already exists or was already launched.
    AlreadyExists,
    /// Another launch for this id is still running.
    InFlight,
}

impl LaunchOutcome {
    pub fn launched(&self) -> bool {
        matches!(self, LaunchOutcome::Launched)
    }
}

/// Creates one Job per CI job and remembers what it created.
pub struct Launcher {
    cluster: Arc<dyn Cluster>,
    template: Arc<WorkloadTemplate>,
    scope: Scope,
    job_name_prefix: String,
    /// Never pruned. A relaunch replaces the stored descriptor.
    registry: Mutex<HashMap<JobId, Job>>,
    in_flight: Mutex<HashSet<JobId>>,
}

impl Launcher {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        template: Arc<WorkloadTemplate>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            cluster,
            template,
            scope: config.scope.clone(),
            job_name_prefix: config.job_name_prefix.clone(),
            registry: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Deterministic Job name for a CI job.
    pub fn job_name(&self, id: &JobId) -> String {
        format!("{}{}", self.job_name_prefix, id)
    }

    /// Launch a Job for `id` unless one already exists.
    pub async fn launch(&self, id: &JobId) -> Result<LaunchOutcome> {
        let name = self.job_name(id);
        validate_name(&name)?;

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            debug!(job_id = %id, "Launch already in progress, skipping");
            return Ok(LaunchOutcome::InFlight);
        };

        let namespace = &self.scope.namespace;
        if self.cluster.get_job(namespace, &name).await?.is_some() {
            info!(job_id = %id, job = %name, "Job already exists, not launching");
            return Ok(LaunchOutcome::AlreadyExists);
        }

        let job = self.materialize(id)?;
        match self.cluster.create_job(namespace, &job).await {
            Ok(created) => {
                self.registry.lock().insert(id.clone(), created);
                info!(job_id = %id, job = %name, %namespace, "Launched job");
                Ok(LaunchOutcome::Launched)
            }
            Err(e) if e.is_conflict() => {
                info!(job_id = %id, job = %name, "Job was created concurrently, not launching");
                Ok(LaunchOutcome::AlreadyExists)
            }
            Err(e) => Err(Error::Cluster(format!("could not launch job {}: {}", name, e))),
        }
    }

    /// Derive the Job for `id` from the template.
    ///
    /// Sets the name and namespace, stamps the scope labels on the Job and on
    /// its pod template, and pins the agent container to `id`.
    pub fn materialize(&self, id: &JobId) -> Result<Job> {
        let mut job = self.template.instantiate();
        let scope_labels = self.scope.labels();

        job.metadata.name = Some(self.job_name(id));
        job.metadata.generate_name = None;
        job.metadata.namespace = Some(self.scope.namespace.clone());
        job.metadata.resource_version = None;
        job.metadata.uid = None;
        job.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(scope_labels.clone());

        let spec = job
            .spec
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("template has no job spec".to_string()))?;

        // The Job controller generates the selector from the Job's uid.
        if spec.manual_selector != Some(true) {
            spec.selector = None;
        }

        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(scope_labels);

        let agent_container = self.template.agent_container();
        let pod_spec = spec
            .template
            .spec
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("template has no pod spec".to_string()))?;
        for container in pod_spec
            .containers
            .iter_mut()
            .filter(|c| c.name == agent_container)
        {
            let env = container.env.get_or_insert_with(Vec::new);
            env.retain(|var| var.name != ACQUIRE_JOB_ENV);
            env.push(EnvVar {
                name: ACQUIRE_JOB_ENV.to_string(),
                value: Some(id.to_string()),
                ..EnvVar::default()
            });
        }

        Ok(job)
    }

    pub fn is_registered(&self, id: &JobId) -> bool {
        self.registry.lock().contains_key(id)
    }

    /// The Job created for `id`, if this process launched one.
    pub fn descriptor(&self, id: &JobId) -> Option<Job> {
        self.registry.lock().get(id).cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Marks an id as being launched; released on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    id: JobId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<JobId>>, id: &JobId) -> Option<Self> {
        if set.lock().insert(id.clone()) {
            Some(Self {
                set,
                id: id.clone(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Reject names the API server would refuse (RFC 1123 label).
fn validate_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if name.len() > MAX_NAME_LEN || !valid_chars || !valid_edges {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a valid job name",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, template};
    use kubekite_core::PropagationPolicy;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::new(Scope::new("acme", "ci", "builds"));
        config.agent_container = "agent".to_string();
        config
    }

    fn launcher(cluster: Arc<FakeCluster>) -> Launcher {
        Launcher::new(cluster, Arc::new(template()), &config())
    }

    fn agent_env(job: &Job) -> Vec<EnvVar> {
        let pod_spec = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        pod_spec
            .containers
            .iter()
            .find(|c| c.name == "agent")
            .and_then(|c| c.env.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_job_name_is_deterministic() {
        let launcher = launcher(Arc::new(FakeCluster::new()));
        let id = JobId::from("abc123");
        assert_eq!(launcher.job_name(&id), "buildkite-agent-abc123");
        assert_eq!(launcher.job_name(&id), launcher.job_name(&id.clone()));
    }

    #[test]
    fn test_materialize_stamps_labels_on_job_and_pods() {
        let launcher = launcher(Arc::new(FakeCluster::new()));
        let job = launcher.materialize(&JobId::from("abc123")).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("buildkite-agent-abc123"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("builds"));

        let job_labels = job.metadata.labels.as_ref().unwrap();
        let pod_labels = job
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();

        for labels in [job_labels, pod_labels] {
            assert_eq!(labels["managed-by"], "kubekite");
            assert_eq!(labels["org"], "acme");
            assert_eq!(labels["pipeline"], "ci");
        }
        assert_eq!(job_labels["team"], "infra");
        assert_eq!(pod_labels["app"], "agent");
    }

    #[test]
    fn test_materialize_pins_agent_to_job() {
        let launcher = launcher(Arc::new(FakeCluster::new()));
        let job = launcher.materialize(&JobId::from("abc123")).unwrap();

        let env = agent_env(&job);
        let acquire: Vec<_> = env.iter().filter(|v| v.name == ACQUIRE_JOB_ENV).collect();
        assert_eq!(acquire.len(), 1);
        assert_eq!(acquire[0].value.as_deref(), Some("abc123"));
        assert!(env.iter().any(|v| v.name == "BUILDKITE_AGENT_TAGS"));
    }

    #[test]
    fn test_materialize_leaves_template_untouched() {
        let template = Arc::new(template());
        let launcher = Launcher::new(
            Arc::new(FakeCluster::new()),
            Arc::clone(&template),
            &config(),
        );
        launcher.materialize(&JobId::from("abc123")).unwrap();
        assert_eq!(template.job().metadata.name.as_deref(), Some("template"));
        assert_eq!(
            template.job().metadata.labels.as_ref().unwrap().get("org"),
            None
        );
    }

    #[tokio::test]
    async fn test_launch_creates_job_and_registers_it() {
        let cluster = Arc::new(FakeCluster::new());
        let launcher = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        let outcome = launcher.launch(&id).await.unwrap();
        assert!(outcome.launched());
        assert!(cluster.job("buildkite-agent-abc123").is_some());
        assert!(launcher.is_registered(&id));
        assert_eq!(
            launcher.descriptor(&id).unwrap().metadata.name.as_deref(),
            Some("buildkite-agent-abc123")
        );
    }

    #[tokio::test]
    async fn test_launch_is_idempotent() {
        let cluster = Arc::new(FakeCluster::new());
        let launcher = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        assert_eq!(launcher.launch(&id).await.unwrap(), LaunchOutcome::Launched);
        assert_eq!(
            launcher.launch(&id).await.unwrap(),
            LaunchOutcome::AlreadyExists
        );
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.jobs.lock().len(), 1);
        assert_eq!(launcher.registered_count(), 1);
    }

    #[tokio::test]
    async fn test_job_is_relaunched_after_cleanup() {
        let cluster = Arc::new(FakeCluster::new());
        let launcher = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        assert_eq!(launcher.launch(&id).await.unwrap(), LaunchOutcome::Launched);
        cluster
            .delete_job("builds", "buildkite-agent-abc123", PropagationPolicy::Foreground)
            .await
            .unwrap();

        // The agent exited without taking the job, so it is still scheduled.
        assert_eq!(launcher.launch(&id).await.unwrap(), LaunchOutcome::Launched);
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 2);
        assert!(cluster.job("buildkite-agent-abc123").is_some());
        assert!(launcher.is_registered(&id));
        assert_eq!(launcher.registered_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_job_is_not_relaunched_after_restart() {
        let cluster = Arc::new(FakeCluster::new());
        launcher(Arc::clone(&cluster))
            .launch(&JobId::from("abc123"))
            .await
            .unwrap();

        // Fresh registry, same cluster.
        let restarted = launcher(Arc::clone(&cluster));
        let outcome = restarted.launch(&JobId::from("abc123")).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::AlreadyExists);
        assert!(!restarted.is_registered(&JobId::from("abc123")));
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_launches_create_one_job() {
        let cluster = Arc::new(FakeCluster::new());
        *cluster.lookup_delay.lock() = Some(Duration::from_millis(20));
        let launcher = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        let (a, b) = tokio::join!(launcher.launch(&id), launcher.launch(&id));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);

        assert_eq!(outcomes, vec![LaunchOutcome::Launched, LaunchOutcome::InFlight]);
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_between_controllers_is_benign() {
        let cluster = Arc::new(FakeCluster::new());
        *cluster.lookup_delay.lock() = Some(Duration::from_millis(20));
        let first = launcher(Arc::clone(&cluster));
        let second = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        // Both lookups see no Job; the second create hits a conflict.
        let (a, b) = tokio::join!(first.launch(&id), second.launch(&id));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.launched()).count(), 1);
        assert!(outcomes.contains(&LaunchOutcome::AlreadyExists));
        assert_eq!(cluster.jobs.lock().len(), 1);
        assert_eq!(first.registered_count() + second.registered_count(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_guard_released_after_failure() {
        let cluster = Arc::new(FakeCluster::new());
        *cluster.fail_create.lock() = true;
        let launcher = launcher(Arc::clone(&cluster));
        let id = JobId::from("abc123");

        assert!(launcher.launch(&id).await.is_err());
        assert!(!launcher.is_registered(&id));

        *cluster.fail_create.lock() = false;
        assert_eq!(launcher.launch(&id).await.unwrap(), LaunchOutcome::Launched);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_reported() {
        let cluster = Arc::new(FakeCluster::new());
        *cluster.fail_get.lock() = true;
        let launcher = launcher(Arc::clone(&cluster));

        let result = launcher.launch(&JobId::from("abc123")).await;
        assert!(matches!(result, Err(Error::Cluster(_))));
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_job_id_is_rejected() {
        let cluster = Arc::new(FakeCluster::new());
        let launcher = launcher(Arc::clone(&cluster));

        let too_long = "x".repeat(60);
        for id in ["", "Has_Upper", "ends-with-", too_long.as_str()] {
            let result = launcher.launch(&JobId::from(id)).await;
            assert!(
                matches!(result, Err(Error::InvalidInput(_))),
                "expected {:?} to be rejected",
                id
            );
        }
        assert!(cluster.jobs.lock().is_empty());
    }

    #[test]
    fn test_validate_name_accepts_uuid_names() {
        assert!(validate_name("buildkite-agent-0190b6a4-7f1e-4c2a-9d3e-5a7b8c9d0e1f").is_ok());
    }
}
