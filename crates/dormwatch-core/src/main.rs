//! dormwatch CLI
//!
//! Command-line entry point for the electricity balance monitor.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use dormwatch::alerting::{message, AlertSender, EmailNotifier};
use dormwatch::fetcher::PortalClient;
use dormwatch::monitor::{CycleOutcome, Monitor, MonitorSettings};
use dormwatch::Config;

/// dormwatch - Dormitory electricity balance monitor
#[derive(Parser)]
#[command(name = "dormwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML); environment variables take precedence
    #[arg(short, long, global = true, env = "DORMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Check the balance on an interval until stopped (default)
    Run,

    /// Run a single check and exit
    Check,

    /// Send a test email to verify SMTP settings
    TestEmail,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env file is fine; variables may come from the container.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes the log file on exit
    let _guard = match init_tracing(&config, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Commands::Run);

    if !matches!(command, Commands::TestEmail) {
        if let Err(e) = config.validate() {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    }

    let result = match command {
        Commands::Run => run_monitor(&config).await,
        Commands::Check => run_check(&config).await,
        Commands::TestEmail => run_test_email(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let log_level = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let json = config.log_format == "json";

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    });

    let mut guard = None;
    if let Some(path) = config.resolve_log_path() {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("log file path '{}' has no file name", path.display()))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;

        let (writer, worker_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        guard = Some(worker_guard);

        layers.push(if json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_writer(writer).with_ansi(false).boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

async fn run_monitor(config: &Config) -> anyhow::Result<()> {
    let source = PortalClient::new(config)?;
    let notifier = EmailNotifier::new(config)?;

    info!(
        receiver = %config.receiver_email,
        smtp = %format!("{}:{}", config.smtp_server, config.smtp_port),
        "Loaded configuration"
    );

    let mut monitor = Monitor::new(source, notifier, MonitorSettings::from(config));
    monitor.run(shutdown_signal()).await;

    info!("Monitor stopped");
    Ok(())
}

async fn run_check(config: &Config) -> anyhow::Result<()> {
    let source = PortalClient::new(config)?;
    let notifier = EmailNotifier::new(config)?;
    let mut monitor = Monitor::new(source, notifier, MonitorSettings::from(config));

    match monitor.check_once(Utc::now()).await {
        CycleOutcome::FetchFailed(kind) => bail!("balance check failed ({kind:?})"),
        CycleOutcome::AlertFailed { balance } => {
            bail!("balance is {balance:.2} kWh but the alert email could not be sent")
        }
        outcome => {
            info!(?outcome, "Check complete");
            Ok(())
        }
    }
}

async fn run_test_email(config: &Config) -> anyhow::Result<()> {
    let notifier = EmailNotifier::new(config)?;

    info!(to = %config.receiver_email, "Sending test email");
    notifier
        .send(&message::test_message(Utc::now()))
        .await
        .context("test email failed")?;

    info!("Test email sent");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM from the container runtime
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
