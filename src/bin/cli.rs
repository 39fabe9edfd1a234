//! CLI binary for leadcall.

use clap::{Parser, Subcommand};
use leadcall::audio::capture::CpalInput;
use leadcall::audio::playback::CpalOutput;
use leadcall::diagnostics::{default_log_dir, init_logging};
use leadcall::host::stdio::run_stdio_bridge;
use leadcall::{AssistantConfig, Backends, SessionState, Widget, WidgetCommand, WidgetEvent};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// leadcall: voice assistant that qualifies leads and books demo meetings.
#[derive(Parser)]
#[command(name = "leadcall", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write a daily-rolling log file (default directory when no path
    /// is given).
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    log_dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Talk to the consultant on the local microphone and speaker.
    Chat,

    /// List available audio devices.
    Devices,

    /// Serve the JSON host protocol on stdin/stdout.
    Host,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.as_ref().and_then(|p| {
        if p.as_os_str().is_empty() {
            default_log_dir()
        } else {
            Some(p.clone())
        }
    });
    let _log_guard = init_logging(log_dir.as_deref());

    let command = cli.command.unwrap_or(Command::Chat);
    if let Command::InitConfig { force } = command {
        return init_config(cli.config, force);
    }
    let config = AssistantConfig::load(cli.config.as_deref())?;

    match command {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
        Command::Host => run_host(config).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

async fn run_chat(config: AssistantConfig) -> anyhow::Result<()> {
    println!("leadcall v{}", env!("CARGO_PKG_VERSION"));

    let backends = Backends::production(&config)?;
    let (widget, handle) = Widget::new(config, backends);
    let mut events = handle.subscribe();
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let widget_task = tokio::spawn(widget.run(cancel.clone()));
    handle.send(WidgetCommand::Start).await?;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if !print_event(&event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    widget_task.await?;
    Ok(())
}

/// Print one event; returns `false` when the call is over.
fn print_event(event: &WidgetEvent) -> bool {
    match event {
        WidgetEvent::StateChanged { state } => match state {
            SessionState::Connecting => println!("Connecting..."),
            SessionState::Active => {
                println!("\nConnected! Speak into your microphone. Press Ctrl+C to stop.\n");
            }
            SessionState::AwaitingBooking => println!("Booking your demo..."),
            SessionState::Success => println!("Demo meeting booked."),
            SessionState::Idle => return false,
            SessionState::Error(kind) if !kind.keeps_session() => return false,
            SessionState::Error(_) => {}
        },
        WidgetEvent::Transcript { text } => println!("You: {text}"),
        WidgetEvent::Error { kind, message } => {
            eprintln!("{} ({message})", kind.user_message());
        }
        WidgetEvent::BookingRejected { missing } => {
            println!("Still missing: {}", missing.join(", "));
        }
        WidgetEvent::TimedOut => println!("Session ended after inactivity."),
        WidgetEvent::Opened
        | WidgetEvent::Closed
        | WidgetEvent::OutputLevel { .. }
        | WidgetEvent::BookingDelivered { .. } => {}
    }
    true
}

async fn run_host(config: AssistantConfig) -> anyhow::Result<()> {
    let host = config.host.clone();
    let backends = Backends::production(&config)?;
    let (widget, handle) = Widget::new(config, backends);
    let cancel = CancellationToken::new();
    let widget_task = tokio::spawn(widget.run(cancel.clone()));

    let result = run_stdio_bridge(handle, host).await;
    cancel.cancel();
    widget_task.await?;
    result.map_err(|e| anyhow::anyhow!("host bridge failed: {e}"))
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalInput::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalOutput::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(AssistantConfig::default_config_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AssistantConfig::default().save_to_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
