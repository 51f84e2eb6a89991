//! PDO acquisition CLI
//!
//! Command-line front end of the canopen-telemetry library. It adds what the
//! library leaves to the application:
//! - Logging setup (console or log file)
//! - config.toml loading and CLI overrides
//! - Ctrl+C / SIGTERM handling
//! - Transport and store selection
//! - One-shot export and inspection commands

use anyhow::{Context, Result};
use canopen_telemetry::{
    export_trial_to_dir, AcquisitionPipeline, FieldMap, JsonlStore, ReplayDriver, RunSummary,
    StopSignal, TrialStore,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;

use config::{AppConfig, TransportKind};

/// PDO Acquire - Collect motor controller PDO traffic in trials
#[derive(Parser, Debug)]
#[command(name = "pdo-acquire")]
#[command(about = "Acquire CANopen PDO traffic in power-on/power-off trials", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Write log output to this file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the acquisition loop until interrupted
    Run {
        /// Directory holding trial tables (overrides storage.data_dir)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,

        /// Replay a JSON-lines capture instead of reading the bus
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,

        /// Do not export trials to CSV when they finish
        #[arg(long)]
        no_export: bool,
    },

    /// Export one stored trial to CSV
    Export {
        /// Trial number to export
        #[arg(short, long, value_name = "N")]
        trial: u32,

        /// Output directory (overrides storage.csv_dir)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Directory holding trial tables (overrides storage.data_dir)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },

    /// List stored trials
    Trials {
        /// Directory holding trial tables (overrides storage.data_dir)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Print the active field map
    Fields,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    log::info!("PDO Acquire v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using canopen-telemetry v{}", canopen_telemetry::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Run {
            data_dir,
            replay,
            no_export,
        } => {
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            if let Some(file) = replay {
                config.transport.kind = TransportKind::Replay;
                config.transport.replay_file = Some(file);
            }
            if no_export {
                config.storage.export_after_trial = false;
            }
            run_mode(config).await
        }
        Command::Export {
            trial,
            out,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            if let Some(dir) = out {
                config.storage.csv_dir = dir;
            }
            export_mode(&config, trial)
        }
        Command::Trials { data_dir } => {
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            trials_mode(&config)
        }
        Command::Fields => fields_mode(&config),
    }
}

/// Run mode - acquire trials until Ctrl+C, SIGTERM or end of replay
async fn run_mode(config: AppConfig) -> Result<()> {
    let field_map = Arc::new(config.field_map()?);
    let stop = StopSignal::new();

    let signal_stop = stop.clone();
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        log::warn!("Received shutdown signal, finishing current trial...");
        signal_stop.raise();
    });

    // The pipeline blocks on bus reads, keep it off the async workers
    let worker = tokio::task::spawn_blocking(move || acquire(&config, field_map, stop));
    let summary = worker.await.context("Acquisition task failed")??;

    println!("═══════════════════════════════════════════════");
    println!("  Acquisition Summary");
    println!("═══════════════════════════════════════════════");
    println!("  Trials completed: {}", summary.trials_completed);
    println!("  Frames stored:    {}", summary.frames_stored);
    println!("  Failed cycles:    {}", summary.failed_cycles);

    Ok(())
}

fn acquire(config: &AppConfig, field_map: Arc<FieldMap>, stop: StopSignal) -> Result<RunSummary> {
    let trials_dir = config.trials_dir();
    let mut store = JsonlStore::open(&trials_dir)
        .with_context(|| format!("Failed to open trial store: {:?}", trials_dir))?;

    let mut pipeline = AcquisitionPipeline::new(config.acquisition.clone(), field_map, stop.clone());
    if config.storage.export_after_trial {
        pipeline = pipeline.with_export_dir(&config.storage.csv_dir);
    }

    match config.transport.kind {
        TransportKind::Replay => {
            let path = config.transport.replay_file.as_ref().context(
                "Replay transport needs a capture file (--replay or transport.replay_file)",
            )?;
            let mut driver = ReplayDriver::from_jsonl(path)
                .with_context(|| format!("Failed to load replay file: {:?}", path))?
                .stop_when_exhausted(stop);
            Ok(pipeline.run(&mut driver, &mut store))
        }
        TransportKind::Socketcan => run_socketcan(config, &mut pipeline, &mut store),
    }
}

#[cfg(feature = "socketcan")]
fn run_socketcan(
    config: &AppConfig,
    pipeline: &mut AcquisitionPipeline,
    store: &mut JsonlStore,
) -> Result<RunSummary> {
    use canopen_telemetry::transport::SocketCanDriver;

    let mut driver = match &config.transport.interface {
        Some(interface) => SocketCanDriver::with_interface(interface.clone()),
        None => SocketCanDriver::new(),
    };
    Ok(pipeline.run(&mut driver, store))
}

#[cfg(not(feature = "socketcan"))]
fn run_socketcan(
    _config: &AppConfig,
    _pipeline: &mut AcquisitionPipeline,
    _store: &mut JsonlStore,
) -> Result<RunSummary> {
    anyhow::bail!("pdo-acquire was built without SocketCAN support (enable the `socketcan` feature)")
}

/// Export mode - write one stored trial to CSV
fn export_mode(config: &AppConfig, trial: u32) -> Result<()> {
    let field_map = config.field_map()?;
    let store = open_store(config)?;

    let path = export_trial_to_dir(&store, &field_map, trial, &config.storage.csv_dir)
        .with_context(|| format!("Failed to export trial {}", trial))?;

    println!("✓ Trial {} exported to {:?}", trial, path);
    Ok(())
}

/// Trials mode - list stored trials with their row counts
fn trials_mode(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let trials = store.list_trials()?;

    if trials.is_empty() {
        println!("No trials stored in {:?}", store.dir());
        return Ok(());
    }

    println!("Trials in {:?}:", store.dir());
    for trial in trials {
        let rows = store
            .load_trial(trial)
            .with_context(|| format!("Failed to read trial {}", trial))?;
        println!("  Trial {:>4}: {} frames", trial, rows.len());
    }
    Ok(())
}

/// Fields mode - print the field map used for decoding and export
fn fields_mode(config: &AppConfig) -> Result<()> {
    let field_map = config.field_map()?;

    println!(
        "{:<6} {:<12} {:<6} {:<10} {:<45} {:<16} {}",
        "ID", "PDO", "Bytes", "Encoding", "Name", "Range", "Unit"
    );
    for spec in field_map.fields() {
        println!(
            "{:<6} {:<12} {:<6} {:<10} {:<45} {:<16} {}",
            spec.message_id,
            field_map.pdo_label(spec.message_id),
            spec.range.to_string(),
            spec.encoding.to_string(),
            spec.name,
            spec.nominal_range,
            spec.unit
        );
    }
    println!("\n{} fields", field_map.len());
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<JsonlStore> {
    let trials_dir = config.trials_dir();
    JsonlStore::open(&trials_dir)
        .with_context(|| format!("Failed to open trial store: {:?}", trials_dir))
}

/// Resolve once Ctrl+C or SIGTERM is received
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
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

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;
    use std::fs::OpenOptions;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "[{} {} {}] {}",
            buf.timestamp(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {:?}", path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}
