use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use filedeck_core::config::ServerConfig;

/// Browser file manager server
#[derive(Debug, Parser)]
#[command(name = "filedeck-core", version, about)]
struct Cli {
    /// Config file (default: ./filedeck.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Base directory for relative paths and the initial listing
    #[arg(long)]
    root: Option<PathBuf>,
    /// Reject paths outside this directory
    #[arg(long)]
    sandbox: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    filedeck_core::util::init_logging();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            ServerConfig::load_or_default(&cwd)?
        }
    };
    config.apply_env();

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(root) = cli.root {
        config.files.root_dir = Some(root);
    }
    if let Some(sandbox) = cli.sandbox {
        config.files.sandbox_root = Some(sandbox);
    }

    info!(
        "Starting filedeck on {}:{}",
        config.server.host, config.server.port
    );

    filedeck_core::server::run_server(config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
