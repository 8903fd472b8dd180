//! Razer PWM fan daemon
//!
//! Drives every Razer PWM PC Fan Controller on the machine: applies the
//! configured channel power, refreshes each controller on a fixed interval
//! and leaves the fans at a safe power on exit.
//!
//! One-shot subcommands (`list`, `info`, `set`) reuse the same session code
//! for diagnostics.

mod commands;
mod config;
mod devices;
mod poller;
mod shutdown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poller::Poller;
use razer_pwm_core::StaticConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Razer PWM fan controller daemon
#[derive(Parser, Debug)]
#[command(name = "razerfand")]
#[command(version, about = "Razer PWM Fan Controller Daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable mock mode (run without hardware for testing/development)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to every controller and keep refreshing until stopped (default)
    Run,
    /// List connected controllers
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show firmware version and fan speeds
    Info {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Set one channel's power on every controller
    Set {
        /// Channel index (0-7)
        #[arg(long)]
        channel: u8,
        /// Power percentage (0-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    let command = args.command.unwrap_or(Command::Run);
    if let Command::List { json } = command {
        return commands::list(args.mock, json);
    }

    // Determine config path: CLI flag > env var > default
    let config_path = config::resolve_config_path(args.config);
    info!("Configuration file: {}", config_path.display());
    let config = config::load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let sessions = devices::open_sessions(&config, args.mock)?;
    let config = Arc::new(config);

    match command {
        Command::Info { json } => {
            blocking(sessions, config, move |sessions, _config| {
                commands::info(sessions, json)
            })
            .await
        }
        Command::Set { channel, percent } => {
            blocking(sessions, config, move |sessions, config| {
                commands::set(sessions, config, channel, percent)
            })
            .await
        }
        Command::Run | Command::List { .. } => run(sessions, config).await,
    }
}

/// Run a blocking session operation off the async runtime
async fn blocking<F>(sessions: Vec<devices::Session>, config: Arc<StaticConfig>, f: F) -> Result<()>
where
    F: FnOnce(&[devices::Session], &StaticConfig) -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(sessions.as_slice(), config.as_ref())).await?
}

async fn run(sessions: Vec<devices::Session>, config: Arc<StaticConfig>) -> Result<()> {
    info!("Razer PWM daemon starting...");

    let connected = {
        let sessions = sessions.clone();
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || devices::connect_all(&sessions, &config)).await?
    };
    if connected == 0 {
        warn!("No controller connected yet, retrying on every tick");
    } else {
        info!("{} of {} controller(s) connected", connected, sessions.len());
    }

    let poller = Arc::new(Poller::new(sessions, Arc::clone(&config)));
    info!("Daemon ready!");

    tokio::select! {
        _ = Arc::clone(&poller).run(config.poller.interval()) => {},
        _ = shutdown_signal() => {},
    }

    // No tick may touch the devices past this point
    poller.stop().await;

    let sessions = poller.sessions().to_vec();
    let shutdown_config = config.shutdown.clone();
    tokio::task::spawn_blocking(move || {
        shutdown::apply_shutdown_power(&shutdown_config, &sessions)
    })
    .await?;

    info!("Daemon shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
