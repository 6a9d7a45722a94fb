//! CLI command implementations.

pub mod run;

use anyhow::{Context, Result};
use kubekite_config::WorkloadTemplate;
use std::path::Path;

pub fn validate(path: &Path, agent_container: &str) -> Result<()> {
    let template = WorkloadTemplate::load(path, agent_container)
        .with_context(|| format!("Invalid job template: {}", path.display()))?;
    let name = template.job().metadata.name.as_deref().unwrap_or("<unnamed>");
    println!("Job template '{}' is valid", name);
    Ok(())
}
