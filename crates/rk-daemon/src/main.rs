//! Rover kernel daemon entry point.
//!
//! Builds the kernel from configuration, registers the radio and engines
//! modules, queues the configured startup tasks and polls the dispatcher
//! until a signal or the iteration limit stops it.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use rk_common::config::KernelConfig;
use rk_modules::{Engines, Radio, ENGINES_MODULE_ID, RADIO_MODULE_ID};
use rk_runtime::Kernel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::signals::{drain_hangups, SignalHandler};

/// Sleep between dispatcher polls.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Iterations between status log lines.
const STATUS_EVERY: u64 = 10_000;

/// Rover kernel daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rk-daemon",
    about = "Rover kernel daemon - time-gated task dispatch for rover modules",
    version,
    long_about = None
)]
struct Args {
    /// Path to a kernel configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum dispatcher iterations (0 = infinite).
    #[arg(long, default_value = "0")]
    max_iterations: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Tick period override, e.g. "50ms".
    #[arg(long, value_parser = humantime::parse_duration)]
    tick_period: Option<Duration>,

    /// Print the final metrics snapshot as JSON on stdout.
    #[arg(long)]
    stats_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rover kernel daemon");

    let mut config = load_config(&args)?;
    if let Some(period) = args.tick_period {
        config.tick.period = period;
    }

    info!(
        tick_period = ?config.tick.period,
        queue_capacity = config.queue.capacity,
        startup_tasks = config.startup_tasks.len(),
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    run_daemon(&config, &signal_handler, &args)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rk_daemon={level},rk_runtime={level},rk_modules={level},rk_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RK_CONFIG_PATH` environment variable
/// 3. `/etc/rover-kernel/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<KernelConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return KernelConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RK_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RK_CONFIG_PATH");
            return KernelConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RK_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RK_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/rover-kernel/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return KernelConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(KernelConfig::default())
}

/// Build the kernel, run the control loop, shut down.
fn run_daemon(config: &KernelConfig, signal_handler: &SignalHandler, args: &Args) -> Result<()> {
    let mut kernel = Kernel::new(config).context("Failed to build kernel")?;

    let radio = Arc::new(Radio::new());
    let engines = Arc::new(Engines::new(kernel.time_base()));
    kernel
        .register(RADIO_MODULE_ID, radio.clone())
        .context("Failed to register radio module")?;
    kernel
        .register(ENGINES_MODULE_ID, engines.clone())
        .context("Failed to register engines module")?;

    kernel.initialize().context("Failed to initialize kernel")?;

    for (index, task) in config.startup_tasks.iter().enumerate() {
        kernel
            .schedule(task.module, task.service, task.delay, &task.args)
            .with_context(|| format!("Failed to queue startup task #{index}"))?;
    }

    kernel.start().context("Failed to start kernel")?;
    info!(state = %kernel.state(), "Kernel started, entering control loop");

    let mut iterations = 0u64;
    while !signal_handler.shutdown_requested() {
        drain_hangups(signal_handler);

        kernel.run_once().context("Dispatcher poll failed")?;

        iterations += 1;
        if args.max_iterations > 0 && iterations >= args.max_iterations {
            info!(iterations, "Maximum iteration count reached");
            break;
        }

        if iterations % STATUS_EVERY == 0 {
            let metrics = kernel.dispatcher().metrics();
            info!(
                iterations,
                now_ms = kernel.time_base().now_ms(),
                pending = kernel.queue().len(),
                invoked = metrics.invoked(),
                skipped = metrics.skipped(),
                "Periodic status"
            );
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    info!("Shutting down...");
    if let Err(e) = kernel.shutdown() {
        warn!("Kernel shutdown failed: {}", e);
    }

    let metrics = kernel.dispatcher().metrics();
    for (p, d) in metrics.percentiles(&config.metrics.percentiles) {
        info!(percentile = p, micros = d.as_micros(), "Callback duration");
    }
    let snapshot = metrics.snapshot();
    info!(
        iterations,
        invoked = snapshot.invoked,
        skipped = snapshot.skipped,
        slow = snapshot.slow_count,
        radio_frames = radio.frames_sent(),
        engine_commands = engines.snapshot().commands,
        signals = signal_handler.state().signal_count(),
        final_state = %kernel.state(),
        "Daemon shutdown complete"
    );

    if args.stats_json {
        let json = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize metrics snapshot")?;
        println!("{json}");
    }

    Ok(())
}
