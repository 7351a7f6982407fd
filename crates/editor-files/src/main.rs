use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use editor_files::{Config, ServerManager, config::expand_path};

#[derive(Parser, Debug)]
#[command(name = "editor-files")]
#[command(about = "Browse and edit files under a base directory from the browser")]
#[command(version)]
struct Cli {
    /// Config file path (optional)
    #[arg(short, long, env = "EDITOR_FILES_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "EDITOR_FILES_LISTEN_IP")]
    listen_ip: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "EDITOR_FILES_PORT")]
    port: Option<u16>,

    /// Base directory that client paths are resolved against
    #[arg(short, long, env = "EDITOR_FILES_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Directory with index.html and the static front end
    #[arg(long, env = "EDITOR_FILES_ASSETS_DIR")]
    assets_dir: Option<PathBuf>,

    /// Title shown in the browser
    #[arg(long, env = "EDITOR_FILES_PAGE_TITLE")]
    page_title: Option<String>,

    /// List directories before files
    #[arg(long)]
    dir_first: bool,

    /// Hide dot-files and dot-directories
    #[arg(long)]
    hide_hidden: bool,

    /// Glob of entry names to leave out of listings (repeatable)
    #[arg(long = "ignore-pattern", value_name = "GLOB")]
    ignore_pattern: Vec<String>,

    /// Reject client paths outside the base directory
    #[arg(long)]
    restrict_paths: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "EDITOR_FILES_VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(ip) = &self.listen_ip {
            config.listen_ip = ip.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(base) = &self.base_dir {
            config.base_dir = Some(expand_path(base)?);
        }
        if let Some(assets) = &self.assets_dir {
            config.assets_dir = expand_path(assets)?;
        }
        if let Some(title) = &self.page_title {
            config.page_title = title.clone();
        }
        if !self.ignore_pattern.is_empty() {
            config.ignore_pattern = self.ignore_pattern.clone();
        }
        config.dir_first |= self.dir_first;
        config.hide_hidden |= self.hide_hidden;
        config.restrict_paths |= self.restrict_paths;

        config.validate().context("validating configuration")?;
        Ok(config)
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("editor_files={level},tower_http={level}")));

    // Use JSON output if --json flag is set, otherwise pretty format
    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = cli.load_config()?;
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    match &config.base_dir {
        Some(base) => info!("Base directory: {}", base.display()),
        None => warn!("No base directory configured; client paths are not restricted"),
    }

    let manager = ServerManager::new();
    manager.start(config).await.context("starting server")?;

    shutdown_signal().await;
    info!("Shutdown signal received, stopping server...");
    manager.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
