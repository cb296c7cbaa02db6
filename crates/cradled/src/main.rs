//! cradled: the Cradle daemon.
//!
//! Single binary that assembles the Cradle subsystems:
//! - Configuration (`cradle.toml` + environment overrides)
//! - Docker runtime connection
//! - Build template provider (local directory or git)
//! - Orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! cradled serve --config /etc/cradle/cradle.toml --port 5005
//! cradled deploy --customer acme --workload bot1 --archive bot1.tar.gz
//! cradled status 3f2a9c1e
//! ```

mod serve;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use cradle_core::{CradleConfig, WorkloadIdentity};
use cradle_orchestrator::{
    DeployRequest, GitTemplate, LocalTemplate, Orchestrator, OrchestratorSettings,
    TemplateProvider,
};
use cradle_runtime::DockerRuntime;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cradled", about = "Cradle workload build and lifecycle daemon")]
struct Cli {
    /// Path to cradle.toml. Defaults apply when the file does not exist.
    #[arg(long, global = true, default_value = "cradle.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Port to listen on (overrides the config file and PORT).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Build and deploy one workload from a local archive.
    Deploy {
        #[arg(long)]
        customer: String,

        #[arg(long)]
        workload: String,

        /// Gzip-compressed tarball of the workload source.
        #[arg(long)]
        archive: PathBuf,
    },

    /// Print the status of a container.
    Status {
        container_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Command::Serve { port: Some(port) } = &cli.command {
        config.server.port = *port;
    }

    init_tracing(cli.log_format, config.debug);
    if !cli.config.exists() {
        warn!(path = ?cli.config, "config file not found, using defaults and environment");
    }
    config.validate().context("invalid configuration")?;

    let orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Command::Serve { .. } => serve::run(config, orchestrator).await,
        Command::Deploy {
            customer,
            workload,
            archive,
        } => {
            let identity = WorkloadIdentity::new(customer, workload)?;
            let bytes = tokio::fs::read(&archive)
                .await
                .with_context(|| format!("cannot read {}", archive.display()))?;
            let record = orchestrator
                .deploy(DeployRequest {
                    identity,
                    archive: bytes.into(),
                    extra_env: BTreeMap::new(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Status { container_id } => {
            let status = orchestrator.status(&container_id).await?;
            println!("{status}");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat, debug: bool) {
    let default_filter = if debug {
        "debug"
    } else {
        "info,cradled=debug,cradle=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Read the config file (when present) and layer the environment on top.
fn load_config(path: &Path) -> anyhow::Result<CradleConfig> {
    let mut config = if path.exists() {
        CradleConfig::from_file(path).with_context(|| format!("cannot load {}", path.display()))?
    } else {
        CradleConfig::default()
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    Ok(config)
}

fn template_provider(config: &CradleConfig) -> anyhow::Result<Arc<dyn TemplateProvider>> {
    let template = &config.template;
    if let Some(path) = &template.path {
        return Ok(Arc::new(LocalTemplate::new(path)));
    }
    match &template.git_url {
        Some(url) => Ok(Arc::new(GitTemplate::new(
            url,
            &template.reference,
            template.token.clone(),
        ))),
        None => anyhow::bail!("no build template configured"),
    }
}

fn build_orchestrator(config: &CradleConfig) -> anyhow::Result<Orchestrator> {
    let runtime = Arc::new(DockerRuntime::connect()?);
    let template = template_provider(config)?;
    info!(template = %template.describe(), network = %config.runtime.network, "orchestrator configured");
    Ok(Orchestrator::new(
        runtime,
        OrchestratorSettings::from_config(config),
        template,
    ))
}
