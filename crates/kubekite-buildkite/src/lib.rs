//! Buildkite integration for kubekite.
//!
//! Implements [`kubekite_core::JobSource`] on top of the Buildkite REST API so
//! the queue watcher can discover jobs waiting for an agent.

pub mod client;

pub use client::{Build, BuildkiteClient, BuildkiteJob};
