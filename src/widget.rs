//! The widget runtime: one task that owns the [`SessionManager`].
//!
//! Commands arrive over an mpsc channel from a [`WidgetHandle`]; events are
//! broadcast as [`WidgetEvent`]s. The loop selects over commands, session
//! input (the connection result, remote events, captured frames, and booking
//! outcomes), the inactivity deadline, and the output-level ticker. Commands
//! never wait on the network, so `End` and `Close` take effect at once.

use crate::config::AssistantConfig;
use crate::error::{Result, VoiceError};
use crate::runtime::WidgetEvent;
use crate::session::{Backends, SessionManager, SessionState};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Requests accepted by the widget loop.
#[derive(Debug)]
pub enum WidgetCommand {
    Open,
    /// Close the widget, ending any session.
    Close,
    /// Start a session (opens the widget if needed).
    Start,
    End,
    Retry,
    Dismiss,
    Status(oneshot::Sender<WidgetStatus>),
}

/// Snapshot returned by [`WidgetCommand::Status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetStatus {
    pub open: bool,
    pub state: SessionState,
    pub session_id: Option<String>,
    pub transcript: String,
    pub pending_booking: bool,
}

/// Cloneable handle for driving a running [`Widget`].
#[derive(Clone)]
pub struct WidgetHandle {
    commands: mpsc::Sender<WidgetCommand>,
    events: broadcast::Sender<WidgetEvent>,
}

impl WidgetHandle {
    /// # Errors
    ///
    /// Returns an error if the widget loop has stopped.
    pub async fn send(&self, command: WidgetCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|e| VoiceError::Channel(format!("widget loop stopped: {e}")))
    }

    /// # Errors
    ///
    /// Returns an error if the widget loop has stopped.
    pub async fn status(&self) -> Result<WidgetStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(WidgetCommand::Status(tx)).await?;
        rx.await
            .map_err(|e| VoiceError::Channel(format!("status reply dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.events.subscribe()
    }
}

pub struct Widget {
    config: AssistantConfig,
    manager: SessionManager,
    open: bool,
    commands: mpsc::Receiver<WidgetCommand>,
    events: broadcast::Sender<WidgetEvent>,
}

impl Widget {
    pub fn new(config: AssistantConfig, backends: Backends) -> (Self, WidgetHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let manager = SessionManager::new(config.clone(), backends, event_tx.clone());
        let widget = Self {
            config,
            manager,
            open: false,
            commands: command_rx,
            events: event_tx.clone(),
        };
        let handle = WidgetHandle {
            commands: command_tx,
            events: event_tx,
        };
        (widget, handle)
    }

    /// Run until `cancel` fires or every handle is dropped. The session is
    /// ended on exit.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut level_tick = tokio::time::interval(self.config.session.level_interval());
        level_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let emit_levels = self.config.host.emit_levels;

        loop {
            let deadline = self.manager.inactivity_deadline();
            tokio::select! {
                () = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                input = self.manager.next_input() => self.manager.handle_input(input),
                () = sleep_until(deadline) => {
                    self.manager.check_inactivity(Instant::now());
                }
                _ = level_tick.tick(), if emit_levels && self.manager.is_live() => {
                    let level = self.manager.sample_output_level();
                    self.emit(WidgetEvent::OutputLevel { level });
                }
            }
        }

        self.manager.end();
        info!("widget loop stopped");
    }

    fn handle_command(&mut self, command: WidgetCommand) {
        debug!(?command, "widget command");
        match command {
            WidgetCommand::Open => self.set_open(true),
            WidgetCommand::Close => {
                self.manager.end();
                self.set_open(false);
            }
            WidgetCommand::Start => {
                self.set_open(true);
                if let Err(e) = self.manager.begin_start() {
                    warn!("start failed: {e}");
                }
            }
            WidgetCommand::End => self.manager.end(),
            WidgetCommand::Retry => {
                if let Err(e) = self.manager.retry() {
                    warn!("retry failed: {e}");
                }
            }
            WidgetCommand::Dismiss => self.manager.dismiss(),
            WidgetCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> WidgetStatus {
        WidgetStatus {
            open: self.open,
            state: self.manager.state(),
            session_id: self.manager.session_id().map(str::to_owned),
            transcript: self.manager.transcript().to_owned(),
            pending_booking: self.manager.has_pending_booking(),
        }
    }

    fn set_open(&mut self, open: bool) {
        if self.open == open {
            return;
        }
        self.open = open;
        self.emit(if open {
            WidgetEvent::Opened
        } else {
            WidgetEvent::Closed
        });
    }

    fn emit(&self, event: WidgetEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
