//! Core domain types and traits for kubekite.
//!
//! This crate contains:
//! - Job identifiers and the controller scope
//! - The `Cluster` trait consumed by the launcher and reconciler
//! - The `JobSource` trait consumed by the queue watcher
//! - Error types shared across the workspace

pub mod cluster;
pub mod error;
pub mod id;
pub mod scope;
pub mod source;

pub use cluster::{Cluster, ContainerPhase, ContainerSnapshot, PodSnapshot, PropagationPolicy};
pub use error::{Error, Result};
pub use id::JobId;
pub use scope::Scope;
pub use source::JobSource;
