use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use monarx_core::sampler::SystemSampler;
use monarx_core::VERSION;
use monarx_daemon::config::{LogConfig, DEFAULT_CONFIG_PATH};
use monarx_daemon::{Config, Engine, EngineSettings};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Monarx - system pressure monitor daemon
///
/// Samples CPU, memory and swap, classifies memory pressure and raises
/// native notifications when thresholds are crossed
#[derive(Parser, Debug)]
#[command(name = "monarx-daemon")]
#[command(version = VERSION)]
#[command(about = "Monarx Daemon - system pressure monitor", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Continuous monitoring until Ctrl-C
    Run,

    /// Run a single cycle and print the status
    Once {
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },

    /// Validate and persist new alert thresholds
    SetThresholds {
        /// CPU limit in percent
        #[arg(long)]
        cpu: f64,

        /// Memory limit in percent
        #[arg(long)]
        mem: f64,

        /// Swap limit in percent
        #[arg(long)]
        swap: f64,

        /// Where to write the result (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::GenerateConfig { output }) => generate_config(&output),
        Some(Commands::SetThresholds {
            cpu,
            mem,
            swap,
            output,
        }) => set_thresholds(&cli.config, cpu, mem, swap, output),
        Some(Commands::Once { json }) => {
            let config = load_config(&cli.config)?;
            run_once(config, json).await
        }
        Some(Commands::Run) => run_engine(load_config(&cli.config)?).await,
        None => {
            let config = load_config(&cli.config)?;
            info!("No command specified, running engine by default");
            run_engine(config).await
        }
    }
}

/// Run the engine until Ctrl-C
async fn run_engine(config: Config) -> Result<()> {
    info!("Monarx Daemon v{} starting...", VERSION);

    let notifier = if config.notifications.enabled {
        let backend = config.notifications.backend.resolve();
        info!("Notifications enabled via {}", backend);
        Some(backend.build())
    } else {
        warn!("Notifications disabled, alerts are only logged");
        None
    };

    let engine = Engine::new(
        Box::new(SystemSampler::new()),
        EngineSettings::from(&config),
        notifier,
    );

    let cancel = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down...");
    cancel.cancel();

    let stats = engine_task.await.context("Engine task failed")?;
    info!(
        "Monarx Daemon stopped after {} successful cycles",
        stats.successful_cycles()
    );
    Ok(())
}

/// Run a single cycle and print compact and detailed status
async fn run_once(config: Config, json: bool) -> Result<()> {
    let mut engine = Engine::new(
        Box::new(SystemSampler::new()),
        EngineSettings::from(&config),
        None,
    );

    let snapshot = engine.run_cycle().await.context("Sampling failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    } else {
        println!("{}", snapshot.compact);
        println!();
        println!("{}", snapshot.detailed);
    }

    engine.shutdown().await;
    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> Result<()> {
    init_logging(&LogConfig::default())?;
    info!("Generating default configuration file: {:?}", output);

    Config::default()
        .save_to_file(output)
        .context("Failed to save configuration file")?;

    info!("Configuration file generated successfully");
    Ok(())
}

/// Validate new limits and write them back
fn set_thresholds(
    config_path: &Path,
    cpu: f64,
    mem: f64,
    swap: f64,
    output: Option<PathBuf>,
) -> Result<()> {
    // The file alone: env overrides must not be persisted
    let config = match Config::from_file(config_path) {
        Ok(config) => {
            init_logging(&config.logging)?;
            config
        }
        Err(e) => {
            init_logging(&LogConfig::default())?;
            return Err(e).context("Configuration validation failed");
        }
    };
    let updated = config
        .with_thresholds(cpu, mem, swap)
        .context("Rejected thresholds")?;

    let output = output.unwrap_or_else(|| config_path.to_path_buf());
    updated
        .save_to_file(&output)
        .context("Failed to save configuration file")?;

    info!(
        "Thresholds saved to {:?}: CPU {:.0}% / MEM {:.0}% / SWAP {:.0}% (effective on next start)",
        output, cpu, mem, swap
    );
    Ok(())
}

/// Load configuration and initialise logging from it
///
/// Configuration errors are fatal: the engine never starts with bad values.
fn load_config(path: &Path) -> Result<Config> {
    match Config::load(path) {
        Ok(config) => {
            init_logging(&config.logging)?;
            if path.exists() {
                info!("Configuration loaded from: {:?}", path);
            } else {
                warn!(
                    "Configuration file not found: {:?}, using defaults",
                    path
                );
            }
            Ok(config)
        }
        Err(e) => {
            init_logging(&LogConfig::default())?;
            Err(e).context("Configuration validation failed")
        }
    }
}

/// Initialize logging with file and stdout output
fn init_logging(logging: &LogConfig) -> Result<()> {
    // Create logs directory if it doesn't exist
    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", logging.log_dir))?;

    // File appender for daemon logs
    let file_appender = tracing_appender::rolling::daily(&logging.log_dir, &logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Setup tracing subscriber with both stdout and file output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.level.as_str().into()),
        )
        .init();

    // Prevent guard from being dropped
    std::mem::forget(guard);

    Ok(())
}
