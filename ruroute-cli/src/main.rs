//! Ruroute CLI
//!
//! A command-line interface for the ruroute per-application traffic router.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hop_rules::Router;
use ruroute_engine::{CommonConfig, Config, RouterEngine};

/// File name prefix for rolling log files
const LOG_FILE_NAME: &str = "ruroute.log";

/// How long to wait for the engine to wind down after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Ruroute - route each application's traffic direct, blocked or via a proxy
#[derive(Parser)]
#[command(name = "ruroute")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ruroute.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router until interrupted (SIGHUP reloads routing rules)
    Run,

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "ruroute.toml")]
        output: PathBuf,
    },

    /// Probe every enabled upstream proxy and report its latency
    Check,

    /// Show what the router would do with a connection
    Resolve {
        /// Process name, e.g. "firefox" or "chrome.exe"
        app: String,

        /// Destination host name or address
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        log_level,
        command,
    } = Cli::parse();

    if let Commands::GenConfig { output } = command {
        let _guard = init_logging(log_level.as_deref().unwrap_or("info"), None)?;
        return generate_config(output);
    }

    let config = load_config(&config_path)?;
    let level = log_level.unwrap_or_else(|| config.common.log_level.clone());

    match command {
        Commands::Run => {
            let _guard = init_logging(&level, Some(&config.common))?;
            info!("Configuration loaded from {:?}", config_path);
            run(config, config_path).await
        }
        Commands::Check => {
            let _guard = init_logging(&level, None)?;
            check(config).await
        }
        Commands::Resolve { app, host } => {
            let _guard = init_logging(&level, None)?;
            resolve(&config, &app, &host);
            Ok(())
        }
        Commands::GenConfig { .. } => Ok(()),
    }
}

/// Install the tracing subscriber
///
/// With a `log_file` directory configured, output also goes to a rolling
/// file there. The returned guard flushes that file and must be held until
/// exit.
fn init_logging(level: &str, common: Option<&CommonConfig>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some((dir, rotation)) = common.and_then(|c| c.log_file.as_deref().map(|dir| (dir, c.log_rotation.as_str())))
    else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {:?}", dir))?;
    let appender = match rotation {
        "hourly" => tracing_appender::rolling::hourly(dir, LOG_FILE_NAME),
        "never" => tracing_appender::rolling::never(dir, LOG_FILE_NAME),
        _ => tracing_appender::rolling::daily(dir, LOG_FILE_NAME),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    Ok(Some(guard))
}

async fn run(config: Config, config_path: PathBuf) -> Result<()> {
    info!("Starting ruroute...");

    let engine = Arc::new(RouterEngine::new(config).context("Failed to create router engine")?);

    // Create shutdown handle before moving engine into task
    let shutdown_tx = engine.create_shutdown_handle();

    let mut engine_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    let mut signals = Signals::new()?;
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Shutdown => break,
                Signal::Reload => reload(&engine, &config_path).await,
            },

            joined = &mut engine_handle => {
                // The engine only returns on its own when it failed to start
                return match joined {
                    Ok(result) => result.context("Router engine failed"),
                    Err(e) => Err(e).context("Router engine task failed"),
                };
            }
        }
    }

    info!("Shutting down...");

    // Signal graceful shutdown
    let _ = shutdown_tx.send(());

    // Wait for the engine to finish (with timeout)
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, engine_handle).await {
        Ok(Ok(Err(e))) => error!("Router engine error: {}", e),
        Ok(Err(e)) => error!("Router engine task failed: {}", e),
        Err(_) => warn!("Router engine did not stop within {:?}", SHUTDOWN_TIMEOUT),
        Ok(Ok(Ok(()))) => {}
    }

    Ok(())
}

/// Re-read the config file and apply its routing section
async fn reload(engine: &RouterEngine, path: &Path) {
    info!("Reloading routing from {:?}", path);
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            error!("Reload failed, keeping current routing: {}", e);
            return;
        }
    };
    match engine.update_routing(&config).await {
        Ok(closed) => info!("Routing reloaded, {} flows closed", closed),
        Err(e) => error!("Reload failed, keeping current routing: {}", e),
    }
}

async fn check(config: Config) -> Result<()> {
    let timeout = config.check.timeout();
    let target = format!("{}:{}", config.check.target_host, config.check.target_port);
    let engine = RouterEngine::new(config).context("Failed to create router engine")?;

    let checks = engine.check_proxies(timeout).await;
    if checks.is_empty() {
        println!("No enabled proxies configured");
        return Ok(());
    }

    println!("Probing {} proxies via {}", checks.len(), target);
    let mut failed = 0;
    for check in &checks {
        match &check.result {
            Ok(latency) => println!("  {:<16} {:<28} ok     {} ms", check.id, check.endpoint, latency.as_millis()),
            Err(e) => {
                failed += 1;
                println!("  {:<16} {:<28} FAILED {}", check.id, check.endpoint, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} proxies failed", failed, checks.len());
    }
    Ok(())
}

fn resolve(config: &Config, app: &str, host: &str) {
    for warning in config.warnings() {
        warn!("{}", warning);
    }
    let decision = Router::new(config.snapshot()).resolve(app, host);
    println!("{} -> {}: {}", app, host, decision);
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the configuration file and add your upstream proxies before running.");

    Ok(())
}

enum Signal {
    Shutdown,
    Reload,
}

/// Process signals the router reacts to
struct Signals {
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(unix)]
    sighup: signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        })
    }

    #[cfg(windows)]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
                Signal::Shutdown
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
                Signal::Shutdown
            }
            _ = self.sighup.recv() => {
                info!("Received SIGHUP");
                Signal::Reload
            }
        }
    }

    #[cfg(windows)]
    async fn recv(&mut self) -> Signal {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
        Signal::Shutdown
    }
}
