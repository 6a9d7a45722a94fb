//! kubekite - launches a Kubernetes Job for every Buildkite job waiting on an agent.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kubekite")]
#[command(about = "Run Buildkite agents as Kubernetes Jobs", long_about = None)]
struct Cli {
    /// Turn on debug logging
    #[arg(long, env = "DEBUG", global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a pipeline and run its jobs on Kubernetes
    Run(RunArgs),
    /// Validate a job template
    Validate {
        /// Path to the job template
        #[arg(default_value = "job.yaml")]
        path: PathBuf,
        /// Name of the agent container in the template
        #[arg(long, env = "AGENT_CONTAINER", default_value = "buildkite-agent")]
        agent_container: String,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Buildkite API token
    #[arg(long, env = "BUILDKITE_API_TOKEN", hide_env_values = true)]
    pub buildkite_api_token: String,

    /// Buildkite organization
    #[arg(long, env = "BUILDKITE_ORG")]
    pub buildkite_org: String,

    /// Buildkite pipeline to watch for new jobs
    #[arg(long, env = "BUILDKITE_PIPELINE")]
    pub buildkite_pipeline: String,

    /// Path to a single kubeconfig file; in-cluster config is used when absent
    #[arg(long, env = "KUBE_CONFIG")]
    pub kube_config: Option<PathBuf>,

    /// Kubernetes namespace to run jobs in
    #[arg(long, env = "KUBE_NAMESPACE", default_value = "default")]
    pub kube_namespace: String,

    /// Path to the job template
    #[arg(long, env = "JOB_TEMPLATE", default_value = "job.yaml")]
    pub job_template: PathBuf,

    /// Timeout in seconds for API requests, 0 for none
    #[arg(long, env = "KUBE_TIMEOUT", default_value = "15")]
    pub kube_timeout: u64,

    /// Name of the agent container in the template
    #[arg(long, env = "AGENT_CONTAINER", default_value = "buildkite-agent")]
    pub agent_container: String,

    /// Seconds between polls of the Buildkite API
    #[arg(long, env = "POLL_INTERVAL", default_value = "15")]
    pub poll_interval: u64,

    /// Seconds between cleanups of finished jobs
    #[arg(long, env = "CLEANUP_INTERVAL", default_value = "15")]
    pub cleanup_interval: u64,

    /// Seconds to wait for in-flight launches on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "15")]
    pub shutdown_timeout: u64,
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Validate {
            path,
            agent_container,
        } => commands::validate(&path, &agent_container)?,
    }

    Ok(())
}
