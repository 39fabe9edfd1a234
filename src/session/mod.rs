//! Lifecycle of one voice conversation.
//!
//! [`SessionManager`] acquires the microphone and speaker, opens the remote
//! session, forwards captured frames, dispatches every [`RemoteEvent`], and
//! tears everything down on `end()`, on an unrecoverable error, on a remote
//! close, or after the inactivity timeout. At most one session exists at a
//! time; starting while one is connecting or live is rejected.
//!
//! Nothing here waits on the network while holding the loop: the connection
//! attempt and booking deliveries run as spawned tasks whose results come
//! back through [`SessionManager::next_input`], and `end()` aborts them.

pub mod state;

pub use state::SessionState;

use crate::audio::capture::CpalInput;
use crate::audio::playback::CpalOutput;
use crate::audio::{AudioBridge, AudioInput, AudioOutput, CaptureHandle, CapturedFrame};
use crate::booking::{BookingRequest, FormRelayNotifier, Notifier};
use crate::config::AssistantConfig;
use crate::error::{ErrorKind, Result, VoiceError};
use crate::live::{
    FunctionCall, GeminiLiveConnector, LiveConnection, LiveConnector, OutboundMessage,
    RemoteEvent, SessionSetup, classify_remote_error,
};
use crate::persona::BOOKING_TOOL_NAME;
use crate::runtime::WidgetEvent;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Captured frames buffered between the audio thread and the session loop.
const FRAME_CHANNEL_SIZE: usize = 32;

/// Realtime text sent after a retried booking goes through.
const BOOKING_CONFIRMED_NOTE: &str =
    "The demo meeting booking has now been confirmed. Let the visitor know.";

/// The collaborators a session needs.
#[derive(Clone)]
pub struct Backends {
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
    pub connector: Arc<dyn LiveConnector>,
    pub notifier: Arc<dyn Notifier>,
}

impl Backends {
    /// cpal devices, the Gemini Live endpoint, and the form relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn production(config: &AssistantConfig) -> Result<Self> {
        Ok(Self {
            input: Arc::new(CpalInput::new(&config.audio)),
            output: Arc::new(CpalOutput::new(&config.audio)),
            connector: Arc::new(GeminiLiveConnector::new(&config.live)),
            notifier: Arc::new(FormRelayNotifier::new(&config.booking)?),
        })
    }
}

/// What the session loop should handle next.
#[derive(Debug)]
pub enum SessionInput {
    Remote(RemoteEvent),
    Frame(CapturedFrame),
    /// The connection attempt started by `begin_start()` finished.
    Connected(Result<LiveConnection>),
    /// A booking delivery finished.
    Delivery(DeliveryOutcome),
}

/// Result of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryOutcome {
    attempt: u64,
    result: Result<()>,
}

/// A booking waiting for a retry.
#[derive(Debug, Clone)]
struct PendingBooking {
    call_id: String,
    request: BookingRequest,
}

/// Devices held while the remote session is being opened.
struct StartingSession {
    capture: Box<dyn CaptureHandle>,
    frames: mpsc::Receiver<CapturedFrame>,
    /// `None` once the attempt has finished and awaits `handle_input`.
    connect: Option<JoinHandle<Result<LiveConnection>>>,
}

/// A booking on its way to the notifier.
struct Delivery {
    attempt: u64,
    pending: PendingBooking,
    /// Tool call to answer; `None` for a retry, which is announced by text.
    call: Option<FunctionCall>,
    task: JoinHandle<()>,
}

/// The live conversation: remote connection, microphone lease, and the
/// activity clock.
struct ActiveSession {
    id: String,
    connection: LiveConnection,
    capture: Box<dyn CaptureHandle>,
    frames: Option<mpsc::Receiver<CapturedFrame>>,
    last_activity: Instant,
}

impl ActiveSession {
    fn send(&self, message: OutboundMessage) {
        if !self.connection.send(message) {
            debug!(session = %self.id, "outbound message dropped, connection closed");
        }
    }
}

pub struct SessionManager {
    config: AssistantConfig,
    backends: Backends,
    bridge: AudioBridge,
    state: SessionState,
    starting: Option<StartingSession>,
    session: Option<ActiveSession>,
    transcript: String,
    pending_booking: Option<PendingBooking>,
    delivery: Option<Delivery>,
    attempts: u64,
    outcome_tx: mpsc::UnboundedSender<DeliveryOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<DeliveryOutcome>,
    events: broadcast::Sender<WidgetEvent>,
}

impl SessionManager {
    pub fn new(
        config: AssistantConfig,
        backends: Backends,
        events: broadcast::Sender<WidgetEvent>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            bridge: AudioBridge::new(&config.audio),
            config,
            backends,
            state: SessionState::Idle,
            starting: None,
            session: None,
            transcript: String::new(),
            pending_booking: None,
            delivery: None,
            attempts: 0,
            outcome_tx,
            outcome_rx,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Running transcript of what the visitor said.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Whether a remote session is open.
    pub fn is_live(&self) -> bool {
        self.session.is_some()
    }

    pub fn has_pending_booking(&self) -> bool {
        self.pending_booking.is_some()
    }

    /// Whether a booking is being delivered right now.
    pub fn is_delivering(&self) -> bool {
        self.delivery.is_some()
    }

    /// Open a new voice session and wait for the connection.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::SessionActive`] if a session is connecting or
    /// live, otherwise the acquisition or connection failure (which has
    /// also been reported and moved the state to `Error`).
    pub async fn start(&mut self) -> Result<()> {
        self.begin_start()?;
        let result = self.connect_result().await;
        self.finish_start(result)
    }

    /// Acquire the devices and start connecting in the background.
    ///
    /// The outcome arrives from [`Self::next_input`] as
    /// [`SessionInput::Connected`]; `end()` abandons the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::SessionActive`] if a session is connecting or
    /// live, or the device failure (reported, state moved to `Error`).
    pub fn begin_start(&mut self) -> Result<()> {
        if self.session.is_some() || self.starting.is_some() || self.state.is_busy() {
            warn!(state = %self.state, "start ignored, a session is already active");
            return Err(VoiceError::SessionActive);
        }
        self.transcript.clear();
        self.pending_booking = None;
        self.transition(SessionState::Connecting);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_SIZE);
        let mut capture = match self.backends.input.acquire(frame_tx) {
            Ok(capture) => capture,
            Err(e) => return Err(self.fail_start(e)),
        };

        match self.backends.output.open() {
            Ok(device) => self.bridge.attach(device),
            Err(e) => {
                capture.release();
                return Err(self.fail_start(e));
            }
        }

        let setup = SessionSetup::from_config(&self.config.live);
        let connector = Arc::clone(&self.backends.connector);
        let connect = tokio::spawn(async move { connector.connect(&setup).await });
        self.starting = Some(StartingSession {
            capture,
            frames: frame_rx,
            connect: Some(connect),
        });
        Ok(())
    }

    /// Wait for the connection attempt; pending forever when none runs.
    async fn connect_result(&mut self) -> Result<LiveConnection> {
        let Some(task) = self.starting.as_mut().and_then(|s| s.connect.as_mut()) else {
            return std::future::pending().await;
        };
        let joined = task.await;
        if let Some(starting) = self.starting.as_mut() {
            starting.connect = None;
        }
        joined.unwrap_or_else(|e| {
            Err(VoiceError::ConnectionFailed(format!("connect task failed: {e}")))
        })
    }

    fn finish_start(&mut self, result: Result<LiveConnection>) -> Result<()> {
        let Some(StartingSession {
            mut capture,
            frames,
            ..
        }) = self.starting.take()
        else {
            debug!("connection finished after the start was abandoned");
            return Err(VoiceError::NoSession);
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                capture.release();
                self.bridge.shutdown();
                return Err(self.fail_start(e));
            }
        };

        let session = ActiveSession {
            id: uuid::Uuid::new_v4().to_string(),
            connection,
            capture,
            frames: Some(frames),
            last_activity: Instant::now(),
        };
        let opening = self.config.live.opening_prompt.trim();
        if !opening.is_empty() {
            session.send(OutboundMessage::Text(opening.to_owned()));
        }
        info!(session = %session.id, "voice session active");
        self.session = Some(session);
        self.transition(SessionState::Active);
        Ok(())
    }

    fn fail_start(&mut self, error: VoiceError) -> VoiceError {
        let kind = error.kind().unwrap_or(ErrorKind::ConnectionFailed);
        warn!(?kind, "session start failed: {error}");
        self.report(kind, error.to_string());
        self.transition(SessionState::Error(kind));
        error
    }

    /// Wait for the next connection result, remote event, captured frame,
    /// or delivery outcome.
    ///
    /// Pending forever while nothing is connecting or open. A transport
    /// that stops without a close event yields `Closed`.
    pub async fn next_input(&mut self) -> SessionInput {
        if self.starting.is_some() {
            return SessionInput::Connected(self.connect_result().await);
        }
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        let ActiveSession {
            connection, frames, ..
        } = session;
        let outcomes = &mut self.outcome_rx;

        tokio::select! {
            event = connection.recv() => {
                SessionInput::Remote(event.unwrap_or(RemoteEvent::Closed { reason: None }))
            }
            frame = recv_frame(frames) => SessionInput::Frame(frame),
            Some(outcome) = outcomes.recv() => SessionInput::Delivery(outcome),
        }
    }

    /// Dispatch one [`SessionInput`].
    pub fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Remote(event) => self.handle_remote_event(event),
            SessionInput::Frame(frame) => self.forward_frame(&frame),
            SessionInput::Connected(result) => {
                if let Err(e) = self.finish_start(result) {
                    debug!("session start did not complete: {e}");
                }
            }
            SessionInput::Delivery(outcome) => self.finish_delivery(outcome),
        }
    }

    /// Encode a captured frame and send it to the remote session.
    pub fn forward_frame(&mut self, frame: &CapturedFrame) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let chunk = self.bridge.encode_frame(&frame.samples);
        session.send(OutboundMessage::Audio(chunk));
    }

    /// React to one event from the remote session.
    pub fn handle_remote_event(&mut self, event: RemoteEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!(?event, "remote event without a session, ignored");
            return;
        };
        if matches!(
            event,
            RemoteEvent::Transcript { .. } | RemoteEvent::Audio(_) | RemoteEvent::ToolCall(_)
        ) {
            session.last_activity = Instant::now();
        }

        match event {
            RemoteEvent::Transcript { text } => self.append_transcript(&text),
            RemoteEvent::Audio(chunk) => {
                if let Err(e) = self.bridge.enqueue(&chunk) {
                    warn!("dropping undecodable audio chunk: {e}");
                }
            }
            RemoteEvent::ToolCall(call) => self.handle_tool_call(call),
            RemoteEvent::ToolCallCancelled { ids } => self.withdraw_booking(&ids),
            RemoteEvent::Interrupted => {
                let stopped = self.bridge.interrupt();
                debug!(stopped, "visitor barged in");
            }
            RemoteEvent::TurnComplete => {
                let reaped = self.bridge.reap_finished();
                debug!(reaped, pending = self.bridge.pending_sources(), "turn complete");
            }
            RemoteEvent::GoAway { time_left } => {
                warn!(?time_left, "remote session is about to close");
            }
            RemoteEvent::Error { message } => {
                let error = match classify_remote_error(&message, ErrorKind::ConnectionLost) {
                    ErrorKind::AuthorizationRequired => VoiceError::AuthorizationRequired(message),
                    _ => VoiceError::ConnectionLost(message),
                };
                let kind = error.kind().unwrap_or(ErrorKind::ConnectionLost);
                warn!(?kind, "remote session error: {error}");
                self.release();
                self.pending_booking = None;
                self.report(kind, error.to_string());
                self.transition(SessionState::Error(kind));
            }
            RemoteEvent::Closed { reason } => {
                info!(?reason, "remote session closed");
                self.release();
                self.pending_booking = None;
                self.transition(SessionState::Idle);
            }
        }
    }

    fn append_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
        self.emit(WidgetEvent::Transcript {
            text: self.transcript.clone(),
        });
    }

    fn handle_tool_call(&mut self, call: FunctionCall) {
        if call.name != BOOKING_TOOL_NAME {
            warn!(tool = %call.name, "agent called an unknown tool");
            let response = json!({ "error": format!("unknown tool: {}", call.name) });
            self.send_tool_response(call, response);
            return;
        }
        if self.delivery.is_some() {
            warn!(call = %call.id, "booking already in progress");
            let response = json!({
                "result": "busy",
                "error": "a booking is already being delivered",
            });
            self.send_tool_response(call, response);
            return;
        }

        let request = match BookingRequest::from_args(&call.args) {
            Ok(request) => request,
            Err(e) => {
                let missing = match &e {
                    VoiceError::IncompleteBookingArgs { missing } => missing.clone(),
                    _ => Vec::new(),
                };
                warn!(?missing, "booking tool call rejected");
                self.emit(WidgetEvent::BookingRejected {
                    missing: missing.clone(),
                });
                self.report(ErrorKind::IncompleteBookingArgs, e.to_string());
                let response = json!({
                    "result": "incomplete",
                    "error": e.to_string(),
                    "missing": missing,
                });
                self.send_tool_response(call, response);
                return;
            }
        };

        info!(call = %call.id, visitor = %request.full_name, "booking requested");
        // A fresh booking supersedes one that failed earlier.
        self.pending_booking = None;
        let pending = PendingBooking {
            call_id: call.id.clone(),
            request,
        };
        self.spawn_delivery(pending, Some(call));
    }

    /// Hand `pending` to the notifier on its own task.
    fn spawn_delivery(&mut self, pending: PendingBooking, call: Option<FunctionCall>) {
        self.transition(SessionState::AwaitingBooking);
        self.attempts += 1;
        let attempt = self.attempts;
        let notifier = Arc::clone(&self.backends.notifier);
        let request = pending.request.clone();
        let outcomes = self.outcome_tx.clone();
        let task = tokio::spawn(async move {
            let result = notifier.deliver(&request).await;
            let _ = outcomes.send(DeliveryOutcome { attempt, result });
        });
        self.delivery = Some(Delivery {
            attempt,
            pending,
            call,
            task,
        });
    }

    fn finish_delivery(&mut self, outcome: DeliveryOutcome) {
        let Some(Delivery { pending, call, .. }) =
            self.delivery.take_if(|d| d.attempt == outcome.attempt)
        else {
            debug!(attempt = outcome.attempt, "stale booking outcome ignored");
            return;
        };

        match outcome.result {
            Ok(()) => {
                info!(call = %pending.call_id, "booking delivered");
                self.emit(WidgetEvent::BookingDelivered {
                    request: pending.request,
                });
                self.transition(SessionState::Success);
                match call {
                    Some(call) => self.send_tool_response(call, json!({ "result": "confirmed" })),
                    None => self.send_text(BOOKING_CONFIRMED_NOTE),
                }
            }
            Err(e) => {
                warn!(call = %pending.call_id, "booking delivery failed: {e}");
                self.report(ErrorKind::NotificationDeliveryFailed, e.to_string());
                self.transition(SessionState::Error(ErrorKind::NotificationDeliveryFailed));
                if let Some(call) = call {
                    let response = json!({
                        "result": "failed",
                        "error": "the booking could not be delivered",
                    });
                    self.send_tool_response(call, response);
                }
                self.pending_booking = Some(pending);
            }
        }
    }

    /// The agent withdrew tool calls; forget any booking they carried and
    /// resume the conversation.
    fn withdraw_booking(&mut self, ids: &[String]) {
        let in_flight = self
            .delivery
            .as_ref()
            .is_some_and(|d| ids.contains(&d.pending.call_id));
        let failed = self
            .pending_booking
            .as_ref()
            .is_some_and(|p| ids.contains(&p.call_id));
        if !in_flight && !failed {
            return;
        }

        if in_flight && let Some(delivery) = self.delivery.take() {
            delivery.task.abort();
        }
        if failed {
            self.pending_booking = None;
        }
        info!(?ids, "booking withdrawn by the agent");
        if matches!(
            self.state,
            SessionState::AwaitingBooking
                | SessionState::Error(ErrorKind::NotificationDeliveryFailed)
        ) {
            self.transition(SessionState::Active);
        }
    }

    fn send_tool_response(&self, call: FunctionCall, response: serde_json::Value) {
        if let Some(session) = &self.session {
            session.send(OutboundMessage::ToolResponse {
                id: call.id,
                name: call.name,
                response,
            });
        }
    }

    fn send_text(&self, text: &str) {
        if let Some(session) = &self.session {
            session.send(OutboundMessage::Text(text.to_owned()));
        }
    }

    /// Leave an `Error` state: re-deliver a failed booking, or restart.
    ///
    /// A live conversation is never restarted; the restart itself connects
    /// in the background like [`Self::begin_start`].
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::SessionActive`] while a session is connecting
    /// or live and there is no booking to retry, or the error of the retried
    /// operation.
    pub fn retry(&mut self) -> Result<()> {
        match self.state {
            SessionState::Error(ErrorKind::NotificationDeliveryFailed)
                if self.pending_booking.is_some() =>
            {
                self.retry_booking()
            }
            _ if self.session.is_some() || self.starting.is_some() => {
                warn!(state = %self.state, "retry ignored, the session is still open");
                Err(VoiceError::SessionActive)
            }
            SessionState::Error(_) | SessionState::Idle => {
                self.release();
                self.begin_start()
            }
            _ => Err(VoiceError::SessionActive),
        }
    }

    /// Re-send the booking whose delivery failed. Success is announced to
    /// the agent by realtime text.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NoSession`] when nothing is pending.
    pub fn retry_booking(&mut self) -> Result<()> {
        let Some(pending) = self.pending_booking.take() else {
            return Err(VoiceError::NoSession);
        };
        info!(call = %pending.call_id, "retrying booking delivery");
        self.spawn_delivery(pending, None);
        Ok(())
    }

    /// Close the result card and return to `Idle`, ending any live session.
    pub fn dismiss(&mut self) {
        if self.state.is_terminal() {
            self.end();
        } else {
            debug!(state = %self.state, "dismiss ignored");
        }
    }

    /// Tear everything down and return to `Idle`. Safe from any state and
    /// safe to call repeatedly.
    pub fn end(&mut self) {
        if self.release() {
            info!("voice session ended");
        }
        self.transcript.clear();
        self.pending_booking = None;
        self.transition(SessionState::Idle);
    }

    /// When the session will time out, if one is open and a timeout is set.
    pub fn inactivity_deadline(&self) -> Option<Instant> {
        let timeout = self.config.session.inactivity_timeout()?;
        self.session.as_ref().map(|s| s.last_activity + timeout)
    }

    /// End the session if it has been idle past the timeout. Returns
    /// whether it was ended.
    pub fn check_inactivity(&mut self, now: Instant) -> bool {
        match self.inactivity_deadline() {
            Some(deadline) if now >= deadline => {
                let idle = self.session.as_ref().map_or(Duration::ZERO, |s| {
                    now.saturating_duration_since(s.last_activity)
                });
                info!(idle_secs = idle.as_secs(), "ending idle voice session");
                self.emit(WidgetEvent::TimedOut);
                self.end();
                true
            }
            _ => false,
        }
    }

    /// Reap finished playback and sample the output level.
    pub fn sample_output_level(&mut self) -> f32 {
        self.bridge.reap_finished();
        self.bridge.output_level()
    }

    /// Abort background work and release the microphone, the speaker, and
    /// the remote connection. Returns whether anything was open.
    fn release(&mut self) -> bool {
        let mut released = false;
        if let Some(delivery) = self.delivery.take() {
            delivery.task.abort();
            debug!(call = %delivery.pending.call_id, "booking delivery abandoned");
        }
        if let Some(mut starting) = self.starting.take() {
            if let Some(connect) = starting.connect.take() {
                connect.abort();
            }
            starting.capture.release();
            debug!("connection attempt abandoned");
            released = true;
        }
        self.bridge.shutdown();
        if let Some(mut session) = self.session.take() {
            session.capture.release();
            session.connection.close();
            debug!(session = %session.id, "session resources released");
            released = true;
        }
        released
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "illegal state transition ignored");
            return false;
        }
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.emit(WidgetEvent::StateChanged { state: next });
        true
    }

    fn report(&self, kind: ErrorKind, message: String) {
        self.emit(WidgetEvent::Error { kind, message });
    }

    fn emit(&self, event: WidgetEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.release();
    }
}

async fn recv_frame(frames: &mut Option<mpsc::Receiver<CapturedFrame>>) -> CapturedFrame {
    loop {
        let Some(rx) = frames.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Some(frame) => return frame,
            None => {
                warn!("microphone stream ended");
                *frames = None;
            }
        }
    }
}
