//! Controller command: watch the pipeline and manage agent Jobs.

use crate::RunArgs;
use anyhow::{Context, Result};
use kubekite_buildkite::BuildkiteClient;
use kubekite_config::{ControllerConfig, WorkloadTemplate};
use kubekite_core::{Cluster, JobSource, Scope};
use kubekite_executor::KubernetesCluster;
use kubekite_scheduler::Controller;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the controller from `args` and run it until SIGINT or SIGTERM.
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = ControllerConfig::new(Scope::new(
        &args.buildkite_org,
        &args.buildkite_pipeline,
        &args.kube_namespace,
    ));
    config.agent_container = args.agent_container.clone();
    config.poll_interval = Duration::from_secs(args.poll_interval);
    config.cleanup_interval = Duration::from_secs(args.cleanup_interval);
    config.shutdown_timeout = Duration::from_secs(args.shutdown_timeout);
    config.api_timeout = (args.kube_timeout > 0).then(|| Duration::from_secs(args.kube_timeout));
    config.validate().context("Invalid configuration")?;

    if args.buildkite_api_token.trim().is_empty() {
        anyhow::bail!("A Buildkite API token is required (--buildkite-api-token or BUILDKITE_API_TOKEN)");
    }

    let template = WorkloadTemplate::load(&args.job_template, &config.agent_container)
        .with_context(|| format!("Failed to load job template: {}", args.job_template.display()))?;
    info!(path = %args.job_template.display(), "Loaded job template");

    let cluster = KubernetesCluster::connect(args.kube_config.as_deref(), config.api_timeout)
        .await
        .context("Failed to connect to Kubernetes")?;

    let source = BuildkiteClient::new(
        &args.buildkite_api_token,
        &args.buildkite_org,
        &args.buildkite_pipeline,
        config.api_timeout,
    )
    .context("Failed to create Buildkite API client")?;

    info!(
        org = %config.scope.org,
        pipeline = %config.scope.pipeline,
        namespace = %config.scope.namespace,
        "Starting kubekite"
    );

    let controller = Controller::new(
        &config,
        template,
        Arc::new(cluster) as Arc<dyn Cluster>,
        Arc::new(source) as Arc<dyn JobSource>,
    );
    controller.run(shutdown_signal()).await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
