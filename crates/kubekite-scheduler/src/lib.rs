//! Job lifecycle controller for kubekite.
//!
//! Turns CI jobs waiting for an agent into Kubernetes Jobs and reclaims them
//! once the agent has finished. Three loops share one cancellation token:
//! - [`QueueWatcher`] polls the CI system and feeds job ids into a channel
//! - [`Dispatcher`] drains the channel and asks the [`Launcher`] to launch
//! - [`Reconciler`] deletes Jobs whose agent container has terminated

pub mod controller;
pub mod dispatch;
pub mod launcher;
pub mod reconciler;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use controller::Controller;
pub use dispatch::{DispatchState, Dispatcher};
pub use launcher::{LaunchOutcome, Launcher};
pub use reconciler::{ReconcileReport, Reconciler};
pub use watcher::QueueWatcher;
