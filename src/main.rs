//! Count-contigs RPC server
//!
//! Serves `wjr_count_contigs.count_contigs` over JSON-RPC (1.0, 1.1 and 2.0)
//! on HTTP, with `_async`/`_check` job submission through the job service.
//! Given an input and an output file it instead runs a single request from
//! the input and writes the response, exiting non-zero on error.
//!
//! Usage:
//!   count-contigs-server                              # Port 9999 on localhost
//!   count-contigs-server --port 8080 --host 0.0.0.0   # Custom binding
//!   count-contigs-server input.json output.json token # Batch mode

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use ccrpc_protocol::AuthRequirement;
use ccrpc_server::config::service_name_from_env;
use ccrpc_server::{
    BatchRunner, Dispatcher, HttpJobService, MethodRegistry, MethodSpec, ParamType, RpcServer,
    ServiceConfig,
};
use ccrpc_services::contigs::{COUNT_CONTIGS, CountContigs};
use ccrpc_services::identity::HttpTokenValidator;
use ccrpc_services::workspace::HttpWorkspaceStore;
use ccrpc_transport::{TransportConfig, TransportServer};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "count-contigs-server", about = "Count contigs JSON-RPC service")]
struct Cli {
    /// Batch mode: file holding one JSON-RPC request
    input: Option<PathBuf>,

    /// Batch mode: file the response is written to
    output: Option<PathBuf>,

    /// Batch mode: token, or a file containing it
    token: Option<String>,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "9999")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Deployment config file (defaults to $KB_DEPLOYMENT_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let service_name = service_name_from_env();
    let config = ServiceConfig::load(cli.config.as_deref(), &service_name)?;

    let registry = Arc::new(build_registry(&config)?);
    let validator = HttpTokenValidator::new(
        config.auth_service_url.as_deref(),
        config.auth_service_timeout(),
    )?;

    if let (Some(input), Some(output)) = (&cli.input, &cli.output) {
        let token = cli.token.as_deref().map(resolve_token).transpose()?;
        let runner = BatchRunner::new(&service_name, Dispatcher::new(registry), validator);
        let code = runner.run_from_file(input, output, token.as_deref()).await?;
        std::process::exit(code);
    }

    let jobs = HttpJobService::new(config.job_service_url.clone(), config.job_service_timeout());
    let server = Arc::new(RpcServer::new(&service_name, registry, validator, jobs));

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.host.clone(),
        trust_x_ip_headers: config.trust_x_ip_headers(),
        service_name: service_name.clone(),
        ..TransportConfig::default()
    };
    let mut transport = TransportServer::start(transport_config, server)
        .await
        .with_context(|| format!("Failed to bind {}:{}", cli.host, cli.port))?;

    info!(
        "{service_name} listening on http://{}/ (Ctrl+C to stop)",
        transport.local_addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    transport.stop().await;
    Ok(())
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn build_registry(config: &ServiceConfig) -> anyhow::Result<MethodRegistry> {
    let store = HttpWorkspaceStore::new(
        config.workspace_url.as_deref(),
        config.workspace_timeout(),
    )?;

    let mut registry = MethodRegistry::new();
    registry.register(
        MethodSpec::new(COUNT_CONTIGS, CountContigs::new(store))
            .with_arity(2, Some(2))
            .with_param_names(["workspace_name", "contigset_id"])
            .with_param_types([ParamType::String, ParamType::String])
            .with_auth(AuthRequirement::Required)
            .with_async(true),
    )?;
    Ok(registry)
}

/// The batch token argument is either the token or a file holding it.
fn resolve_token(arg: &str) -> anyhow::Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file {arg}"))?;
        return Ok(token.trim().to_string());
    }
    Ok(arg.to_string())
}
