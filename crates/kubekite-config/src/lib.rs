//! Configuration for kubekite.
//!
//! This crate handles:
//! - Controller settings (scope, intervals, timeouts)
//! - Loading the workload template a Job is derived from for every CI job

pub mod error;
pub mod settings;
pub mod template;

pub use error::{ConfigError, ConfigResult};
pub use settings::ControllerConfig;
pub use template::WorkloadTemplate;
