//! Cluster backends for kubekite.
//!
//! Provides the Kubernetes implementation of [`Cluster`]: creating and
//! deleting batch Jobs and reading the status of the pods they generate.

pub mod kubernetes;

pub use kubekite_core::cluster::{
    Cluster, ContainerPhase, ContainerSnapshot, PodSnapshot, PropagationPolicy,
};
pub use kubernetes::KubernetesCluster;
