//! NoFall CLI
//!
//! Commands:
//! - monitor: connect to a wearable and stream detection results
//! - replay: run recorded NDJSON frames through the detector offline
//! - simulate: serve a synthetic sensor feed for development
//! - check-url: validate a wearable endpoint URL

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;

use nofall_engine::config::EngineConfig;
use nofall_engine::connection::validate_url;
use nofall_engine::detector::SignalProcessor;
use nofall_engine::engine::MonitorEngine;
use nofall_engine::error::EngineError;
use nofall_engine::sim::{FeedServer, DEFAULT_FRAME_INTERVAL_MS};
use nofall_engine::wire;
use nofall_engine::ENGINE_VERSION;

/// NoFall - wearable fall-detection monitor
#[derive(Parser)]
#[command(name = "nofall")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Monitor a wearable sensor stream for falls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a wearable and stream detection results as NDJSON
    Monitor {
        /// Wearable endpoint (defaults to the configured server URL)
        #[arg(long)]
        url: Option<String>,

        /// Alert countdown duration in seconds
        #[arg(long, default_value = "30")]
        countdown: u32,

        /// Disable the audio alert channel
        #[arg(long)]
        no_sound: bool,

        /// Disable the haptic alert channel
        #[arg(long)]
        no_vibration: bool,
    },

    /// Run recorded NDJSON frames through the detector offline
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Pretty-print each result instead of NDJSON
        #[arg(long)]
        pretty: bool,
    },

    /// Serve a synthetic sensor feed for development without hardware
    Simulate {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,

        /// Milliseconds between frames
        #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// Validate a wearable endpoint URL
    CheckUrl {
        /// URL to validate
        url: String,
    },
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Monitor {
            url,
            countdown,
            no_sound,
            no_vibration,
        } => runtime.block_on(cmd_monitor(url, countdown, no_sound, no_vibration)),

        Commands::Replay { input, pretty } => cmd_replay(&input, pretty),

        Commands::Simulate {
            listen,
            interval_ms,
        } => runtime.block_on(cmd_simulate(&listen, interval_ms)),

        Commands::CheckUrl { url } => {
            validate_url(&url)?;
            println!("OK: {url}");
            Ok(())
        }
    }
}

async fn cmd_monitor(
    url: Option<String>,
    countdown: u32,
    no_sound: bool,
    no_vibration: bool,
) -> Result<(), CliError> {
    let mut config = EngineConfig::default();
    if let Some(url) = url {
        config.server_url = url;
    }
    config.sound_enabled = !no_sound;
    config.vibration_enabled = !no_vibration;
    config.alert.countdown_secs = countdown;

    let engine = MonitorEngine::with_debug_channels(config);
    let mut connection = engine.subscribe_connection();
    let mut detections = engine.subscribe_detections();
    let mut alerts = engine.subscribe_alerts();

    engine.connect().await?;

    // Runs until interrupted.
    loop {
        tokio::select! {
            state = connection.recv() => match state {
                Ok(state) => {
                    tracing::info!(
                        phase = ?state.phase,
                        attempts = state.reconnect_attempts,
                        error = state.last_error.as_deref().unwrap_or(""),
                        "connection"
                    );
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            result = detections.recv() => match result {
                Ok(result) => println!("{}", serde_json::to_string(&result)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind the detection stream");
                }
                Err(RecvError::Closed) => break,
            },
            alert = alerts.recv() => match alert {
                Ok(alert) => {
                    tracing::info!(
                        active = alert.is_active,
                        alert_type = ?alert.alert_type,
                        countdown = alert.countdown,
                        message = %alert.message,
                        "alert"
                    );
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown();
    Ok(())
}

fn cmd_replay(input: &PathBuf, pretty: bool) -> Result<(), CliError> {
    let data = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            eprintln!("reading NDJSON frames from terminal; finish with Ctrl-D");
        }
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let mut processor = SignalProcessor::new();
    // Synthetic receipt clock for frames without their own timestamps.
    let mut received_at_ms: i64 = 0;

    for (line_num, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        received_at_ms += 100;
        match wire::parse_frame(trimmed, received_at_ms) {
            Ok(sample) => {
                let result = processor.process(&sample);
                let rendered = if pretty {
                    serde_json::to_string_pretty(&result)?
                } else {
                    serde_json::to_string(&result)?
                };
                println!("{rendered}");
            }
            Err(err) => {
                // Same contract as the live path: drop and report.
                eprintln!("line {}: {}", line_num + 1, err);
            }
        }
    }

    Ok(())
}

async fn cmd_simulate(listen: &str, interval_ms: u64) -> Result<(), CliError> {
    let feed = FeedServer::bind(listen, interval_ms).await?;
    println!("serving synthetic sensor frames on {}", feed.url());

    // Runs until interrupted.
    std::future::pending::<()>().await;
    Ok(())
}
