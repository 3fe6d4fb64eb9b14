//! norduser-monitor - per-user helper lifecycle daemon
//!
//! Entry point for the monitor binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use norduser_monitor::accounts::{
    EtcGroupReader, SystemIdentityResolver, UserIdentityResolver, UtmpSessionReader,
};
use norduser_monitor::config::{Config, LoggingConfig};
use norduser_monitor::deployment::detect_deployment_context;
use norduser_monitor::diagnostics::{format_user_error, log_startup_diagnostics, BuildInfo};
use norduser_monitor::monitor::{
    wait_for_logout, MonitorSettings, ReconciliationMonitor, SandboxedMonitor,
};
use norduser_monitor::service::{CombinedBackend, ForkBackend, SandboxedBackend, SystemdBackend};
use norduser_monitor::supervisor::RpcSupervisorProvider;

/// Command-line arguments for norduser-monitor
#[derive(Parser, Debug)]
#[command(name = "norduser-monitor")]
#[command(version, about = "Per-user helper lifecycle monitor", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nordvpn/norduser-monitor.toml")]
    pub config: String,

    /// Privileged group name
    #[arg(short, long, env = "NORDUSER_GROUP")]
    pub group: Option<String>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the monitor (default)
    Run {
        /// Disable helpers instead of stopping them on shutdown
        #[arg(long)]
        disable_on_exit: bool,
    },
    /// Block until the user's last session ends
    WaitLogout {
        /// Username to wait for
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging settings come from the file, so it is read first
    let (config, load_error) = match Config::load(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default_config()?, Some(e)),
    };

    let _log_guard = init_logging(&args, &config.logging)?;
    BuildInfo::current().log_banner();

    if let Some(e) = load_error {
        warn!("Failed to load config: {:#}, using defaults", e);
    }
    let config = match config.with_overrides(args.group.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
    };
    tracing::debug!("Config: {:?}", config);

    let context = detect_deployment_context();
    log_startup_diagnostics(&config, context);

    let command = args.command.clone().unwrap_or(Command::Run {
        disable_on_exit: false,
    });

    let result = match command {
        Command::WaitLogout { user } => wait_logout(&config, &user).await,
        Command::Run { .. } if context.is_sandboxed() => run_sandboxed(&config).await,
        Command::Run { disable_on_exit } => run_native(&config, disable_on_exit).await,
    };

    if let Err(e) = &result {
        eprintln!("{}", format_user_error(e));
    }
    result
}

fn session_reader(config: &Config) -> UtmpSessionReader {
    UtmpSessionReader::new(
        &config.sessions.utmp_file,
        &config.sessions.proc_root,
        config.sessions.gui_env_vars.clone(),
    )
}

async fn run_native(config: &Config, disable_on_exit: bool) -> Result<()> {
    let identities: Arc<dyn UserIdentityResolver> = Arc::new(SystemIdentityResolver);
    let fork = Arc::new(ForkBackend::from_config(config, identities.clone()));
    let combined = Arc::new(CombinedBackend::new(
        Arc::new(SystemdBackend::from_config(config)),
        fork.clone(),
    ));

    let mut monitor = ReconciliationMonitor::new(
        MonitorSettings::from_config(config),
        Arc::new(EtcGroupReader::new(&config.group.file)),
        Arc::new(session_reader(config)),
        identities,
        combined.clone(),
    );

    info!(group = %config.group.name, "Starting reconciliation monitor");
    let outcome = tokio::select! {
        res = monitor.run() => res.context("Monitor stopped"),
        sig = shutdown_signal() => sig.map(|name| info!("Received {}, shutting down", name)),
    };

    if disable_on_exit {
        combined.disable_all().await;
    } else {
        combined.stop_all().await;
    }
    fork.stop_all().await;

    info!("norduser-monitor shut down");
    outcome
}

async fn run_sandboxed(config: &Config) -> Result<()> {
    let supervisors = Arc::new(RpcSupervisorProvider::from_config(config, true));
    let mut monitor = SandboxedMonitor::new(
        config.group.name.clone(),
        &config.group.file,
        Arc::new(EtcGroupReader::new(&config.group.file)),
        Arc::new(SystemIdentityResolver),
        Arc::new(SandboxedBackend::new(supervisors)),
    );

    info!(group = %config.group.name, "Starting sandboxed monitor");
    tokio::select! {
        res = monitor.run() => res.context("Sandboxed monitor stopped"),
        sig = shutdown_signal() => sig.map(|name| info!("Received {}, shutting down", name)),
    }
}

async fn wait_logout(config: &Config, user: &str) -> Result<()> {
    let logged_out = wait_for_logout(
        user,
        &config.sessions.utmp_file,
        Arc::new(session_reader(config)),
    )
    .context("Failed to watch sessions")?;

    logged_out.await.context("Logout waiter dropped")??;
    info!(user, "User logged out");
    Ok(())
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT").context("Failed to wait for SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(logging.filter_directive(args.verbose))
    });

    // --log-file wins over the configured log directory
    let log_file = args
        .log_file
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| logging.log_file());

    // If log file is specified, write to both stdout and file
    if let Some(log_file_path) = log_file {
        if let Some(dir) = log_file_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)
            .with_context(|| format!("Failed to open log file {}", log_file_path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path.display());
        return Ok(Some(guard));
    }

    // Stdout only
    match args.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    Ok(None)
}
