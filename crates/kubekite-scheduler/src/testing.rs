//! In-memory collaborators for tests.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kubekite_config::WorkloadTemplate;
use kubekite_core::cluster::*;
use kubekite_core::{Error, JobId, JobSource, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TEMPLATE: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: template
  labels:
    team: infra
spec:
  template:
    metadata:
      labels:
        app: agent
    spec:
      restartPolicy: Never
      containers:
        - name: agent
          image: buildkite/agent:3
          env:
            - name: BUILDKITE_AGENT_ACQUIRE_JOB
              value: stale
            - name: BUILDKITE_AGENT_TAGS
              value: queue=kubernetes
        - name: docker
          image: docker:dind
"#;

pub fn template() -> WorkloadTemplate {
    WorkloadTemplate::parse(TEMPLATE, "agent").unwrap()
}

/// Cluster backed by maps, with knobs for failures and slow lookups.
#[derive(Default)]
pub struct FakeCluster {
    pub jobs: Mutex<BTreeMap<String, Job>>,
    pub pods: Mutex<Vec<PodSnapshot>>,
    pub deleted: Mutex<Vec<(String, PropagationPolicy)>>,
    pub creates: AtomicUsize,
    pub lookup_delay: Mutex<Option<Duration>>,
    pub list_delay: Mutex<Option<Duration>>,
    pub delete_delay: Mutex<Option<Duration>>,
    pub fail_get: Mutex<bool>,
    pub fail_create: Mutex<bool>,
    pub fail_list: Mutex<bool>,
    pub fail_delete: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.jobs.lock().get(name).cloned()
    }

    pub fn add_pod(&self, pod: PodSnapshot) {
        self.pods.lock().push(pod);
    }
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|actual| actual == v),
            None => false,
        })
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<Job>> {
        if *self.fail_get.lock() {
            return Err(Error::Cluster("lookup failed".to_string()));
        }
        // Read before sleeping so concurrent callers can all observe "absent".
        let found = self.job(name);
        let delay = *self.lookup_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(found)
    }

    async fn create_job(&self, _namespace: &str, job: &Job) -> Result<Job> {
        if *self.fail_create.lock() {
            return Err(Error::Cluster("create failed".to_string()));
        }
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&name) {
            return Err(Error::Conflict(name));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        jobs.insert(name, job.clone());
        Ok(job.clone())
    }

    async fn list_pods(&self, _namespace: &str, label_selector: &str) -> Result<Vec<PodSnapshot>> {
        if *self.fail_list.lock() {
            return Err(Error::Cluster("list failed".to_string()));
        }
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|pod| selector_matches(label_selector, &pod.labels))
            .cloned()
            .collect())
    }

    async fn delete_job(
        &self,
        _namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<()> {
        if self.fail_delete.lock().iter().any(|n| n == name) {
            return Err(Error::Cluster("delete failed".to_string()));
        }
        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.jobs.lock().remove(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        self.pods.lock().retain(|pod| pod.job_name() != Some(name));
        self.deleted.lock().push((name.to_string(), propagation));
        Ok(())
    }
}

/// Job source that returns the same ids on every poll.
#[derive(Default)]
pub struct FakeSource {
    pub ids: Mutex<Vec<JobId>>,
    pub polls: AtomicUsize,
    pub fail: Mutex<bool>,
    pub poll_delay: Mutex<Option<Duration>>,
}

impl FakeSource {
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|id| JobId::from(*id)).collect()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn scheduled_jobs(&self) -> Result<Vec<JobId>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.poll_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock() {
            return Err(Error::Api("poll failed".to_string()));
        }
        Ok(self.ids.lock().clone())
    }
}

/// A pod generated by `job_name` whose `container` is in `phase`.
pub fn pod(
    name: &str,
    job_name: &str,
    labels: BTreeMap<String, String>,
    container: &str,
    phase: ContainerPhase,
) -> PodSnapshot {
    let mut labels = labels;
    labels.insert("job-name".to_string(), job_name.to_string());
    PodSnapshot {
        name: name.to_string(),
        labels,
        containers: vec![ContainerSnapshot {
            name: container.to_string(),
            phase,
        }],
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
