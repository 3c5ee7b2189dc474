//! CLI binary for duplex-agent.

use clap::{Parser, Subcommand};
use duplex_agent::bridge::{COMMAND_CAPACITY, run_stdio_bridge};
use duplex_agent::devices::list_audio_devices;
use duplex_agent::{
    CaptureMode, LiveConnector, SessionConfig, SessionOrchestrator, SystemDevices, ToolRegistry,
    ui_bridge,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Live voice, video and text conversation with a remote agent.
#[derive(Parser)]
#[command(name = "duplex-agent", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "DUPLEX_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Video source: none, camera or screen (overrides the config file).
    #[arg(short, long)]
    mode: Option<CaptureMode>,

    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a live session (default).
    Chat,

    /// List available audio devices.
    Devices,

    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays the conversation channel.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("duplex_agent=info,tungstenite=warn"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "duplex-agent.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .init();
    guard
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.capture.mode = mode;
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => {
            list_devices()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Explicit path, else the default path if it exists, else defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    if let Some(path) = path {
        return Ok(SessionConfig::from_file(path)?);
    }
    let default_path = SessionConfig::default_config_path();
    if default_path.is_file() {
        info!(path = %default_path.display(), "loading config");
        return Ok(SessionConfig::from_file(&default_path)?);
    }
    Ok(SessionConfig::default())
}

async fn run_chat(config: SessionConfig) -> anyhow::Result<ExitCode> {
    println!("duplex-agent v{}", env!("CARGO_PKG_VERSION"));

    let registry = ToolRegistry::from_config(&config.tools);
    let connector = LiveConnector::from_env(
        config.transport.clone(),
        config.audio.receive_sample_rate,
        registry.declarations(),
    )?;
    let devices = SystemDevices::new(&config.audio, config.capture.camera_index);
    let quit = config.outbound.quit_sentinel.clone();
    let mode = config.capture.mode;

    let (ui, session_bridge) = ui_bridge(COMMAND_CAPACITY);
    let orchestrator =
        SessionOrchestrator::new(config, Arc::new(connector), Arc::new(devices), registry)
            .with_bridge(session_bridge);

    // Ctrl+C is a normal way to end the session.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });

    println!("\nConnecting (video: {mode})... Type a message and press Enter; '{quit}' quits.\n");

    let session = tokio::spawn(orchestrator.run());
    if let Err(e) = run_stdio_bridge(ui).await {
        tracing::warn!(error = %e, "stdout bridge failed");
    }

    match session.await? {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    let (inputs, outputs) = list_audio_devices()?;

    println!("Input devices:");
    for name in inputs {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in outputs {
        println!("  - {name}");
    }

    Ok(())
}
