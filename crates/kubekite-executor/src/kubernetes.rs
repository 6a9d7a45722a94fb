//! Kubernetes cluster implementation.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ContainerState, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use kubekite_core::cluster::*;
use kubekite_core::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Kubernetes-backed [`Cluster`].
#[derive(Clone)]
pub struct KubernetesCluster {
    client: Client,
}

impl KubernetesCluster {
    /// Build a client and check that the API server answers.
    ///
    /// Uses the kubeconfig file when one is given and the in-cluster service
    /// account otherwise. `timeout` bounds every request.
    pub async fn connect(kubeconfig: Option<&Path>, timeout: Option<Duration>) -> Result<Self> {
        let mut config = match kubeconfig {
            Some(path) => {
                info!(path = %path.display(), "Using kubeconfig file");
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Cluster(format!("failed to read kubeconfig: {}", e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Cluster(format!("invalid kubeconfig: {}", e)))?
            }
            None => {
                info!("No kubeconfig provided, using in-cluster config");
                Config::incluster()
                    .map_err(|e| Error::Cluster(format!("in-cluster config unavailable: {}", e)))?
            }
        };

        config.connect_timeout = timeout;
        config.read_timeout = timeout;
        config.write_timeout = timeout;

        let client = Client::try_from(config).map_err(|e| Error::Cluster(e.to_string()))?;
        let cluster = Self::with_client(client);
        cluster.verify().await?;
        Ok(cluster)
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fail unless the API server is reachable.
    pub async fn verify(&self) -> Result<()> {
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::Cluster(format!("API server unreachable: {}", e)))?;
        info!(version = %version.git_version, "Connected to Kubernetes API server");
        Ok(())
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for KubernetesCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.jobs(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, name))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let name = job.metadata.name.as_deref().unwrap_or_default();
        debug!(%namespace, %name, "Creating job");
        self.jobs(namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| map_kube_error(e, name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSnapshot>> {
        let params = ListParams::default().labels(label_selector);
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, label_selector))?;
        Ok(pods.items.iter().map(pod_snapshot).collect())
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(match propagation {
                PropagationPolicy::Foreground => kube::api::PropagationPolicy::Foreground,
                PropagationPolicy::Background => kube::api::PropagationPolicy::Background,
                PropagationPolicy::Orphan => kube::api::PropagationPolicy::Orphan,
            }),
            ..DeleteParams::default()
        };
        self.jobs(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| map_kube_error(e, name))?;
        Ok(())
    }
}

/// Translate a kube error into the shared error type.
fn map_kube_error(err: kube::Error, subject: &str) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(subject.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => {
            Error::Conflict(format!("{}: {}", subject, resp.message))
        }
        other => Error::Cluster(format!("{}: {}", subject, other)),
    }
}

/// Reduce a pod to the fields the reconciler looks at.
pub fn pod_snapshot(pod: &Pod) -> PodSnapshot {
    let containers = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|status| ContainerSnapshot {
                    name: status.name.clone(),
                    phase: container_phase(status.state.as_ref()),
                })
                .collect()
        })
        .unwrap_or_default();

    PodSnapshot {
        name: pod.metadata.name.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        containers,
    }
}

fn container_phase(state: Option<&ContainerState>) -> ContainerPhase {
    let Some(state) = state else {
        return ContainerPhase::Unknown;
    };
    if let Some(terminated) = &state.terminated {
        ContainerPhase::Terminated {
            exit_code: terminated.exit_code,
        }
    } else if state.running.is_some() {
        ContainerPhase::Running
    } else if state.waiting.is_some() {
        ContainerPhase::Waiting
    } else {
        ContainerPhase::Unknown
    }
}
