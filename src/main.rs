//! fieldmesh - coordination server and reference field peer
//!
//! `serve` runs the coordination server; `peer` runs a reference peer
//! against it.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use fieldmesh::cli::{Cli, Commands, ConfigSubcommand};
use fieldmesh::config::{self, FieldmeshConfig, LoggingSettings};
use fieldmesh::error::{Error, Result};
use fieldmesh::logging::{self, LogGuards};
use fieldmesh::peer::{NodePlan, PeerNode};
use fieldmesh::server::{tasks, HubHandle, Server};
use fieldmesh::version;

fn main() {
    if let Err(e) = run() {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            let _log_guards = logging::init_logging(&LoggingSettings::default(), 0, true)?;
            handle_config_command(subcommand)
        }
        Commands::Serve { config, listen, tasks } => {
            let mut config = FieldmeshConfig::load(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            if let Some(tasks) = tasks {
                config.tasks.file = Some(tasks);
            }
            config.validate()?;

            let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;
            log_startup("Starting fieldmesh server");

            build_runtime("fieldmesh-server")?.block_on(serve(config))
        }
        Commands::Peer {
            config,
            server,
            name,
            stream,
            task,
            smart_data,
            resolution,
            period,
            send_to,
            file,
        } => {
            let mut config = FieldmeshConfig::load(config.as_deref())?;
            if let Some(server) = server {
                config.peer.server_url = server;
            }
            if let Some(name) = name {
                config.peer.name = Some(name);
            }
            config.validate()?;

            let plan = NodePlan {
                stream,
                request_task: task,
                smart_data: smart_data.map(|source| (source, resolution, period)),
                send_file: send_to.zip(file.map(PathBuf::from)),
            };

            let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;
            log_startup("Starting fieldmesh peer");

            build_runtime("fieldmesh-peer")?.block_on(async move {
                let node = PeerNode::new(&config, plan);
                info!(
                    name = %node.name(),
                    server_url = %config.peer.server_url,
                    cache_dir = %config.cache_dir().display(),
                    "Peer configured"
                );
                node.run().await
            })
        }
    }
}

/// Initialize logging from configuration
fn init_logging_from_config(config: &FieldmeshConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

fn log_startup(message: &str) {
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "{}",
        message
    );
}

fn build_runtime(name: &str) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(8))
        .thread_name(name)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

/// Read the configured task pool; no file means an empty pool
fn load_tasks(config: &FieldmeshConfig) -> Result<Vec<Value>> {
    match config.tasks.file.as_deref() {
        Some(path) => {
            let pool = tasks::load_pool(Path::new(path))?;
            info!(path, tasks = pool.len(), "Task pool loaded");
            Ok(pool)
        }
        None => Ok(Vec::new()),
    }
}

async fn serve(config: FieldmeshConfig) -> Result<()> {
    let data_dir = config.data_dir();
    if !data_dir.is_dir() {
        warn!(data_dir = %data_dir.display(), "Data directory does not exist; file requests will fail");
    }
    info!(
        listen = %config.server.listen_addr,
        data_dir = %data_dir.display(),
        block_size = config.relay.block_size,
        "Configuration loaded"
    );

    let server = Server::start(&config, load_tasks(&config)?).await?;

    let reload = tokio::spawn(reload_tasks_on_hangup(config.clone(), server.hub().clone()));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    reload.abort();
    server.shutdown().await;
    Ok(())
}

/// Re-read the task pool file on SIGHUP
#[cfg(unix)]
async fn reload_tasks_on_hangup(config: FieldmeshConfig, hub: HubHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGHUP, task reload disabled");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        match load_tasks(&config) {
            Ok(pool) => {
                if !hub.set_tasks(pool).await {
                    break;
                }
            }
            Err(e) => warn!(error = %e.format_for_log(), "Task reload failed, keeping current pool"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_tasks_on_hangup(_config: FieldmeshConfig, _hub: HubHandle) {}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = FieldmeshConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            FieldmeshConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
