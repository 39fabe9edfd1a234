//! Client side of the remote speech-to-speech session.
//!
//! Everything the session manager sees from the remote end arrives as one
//! [`RemoteEvent`] stream; everything it sends is an [`OutboundMessage`].
//! [`LiveConnector`] is the seam between the session and the transport.

pub mod gemini;
pub mod protocol;

use crate::audio::MediaChunk;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use gemini::GeminiLiveConnector;

/// Channel capacity for inbound remote events.
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// A function call requested by the remote model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Events delivered by the remote session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Partial transcript of what the user said.
    Transcript { text: String },
    /// Synthesized speech chunk.
    Audio(MediaChunk),
    /// The model wants to invoke a tool.
    ToolCall(FunctionCall),
    /// Previously issued tool calls were withdrawn.
    ToolCallCancelled { ids: Vec<String> },
    /// The user started speaking over the model.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// The server will close the connection soon.
    GoAway { time_left: Option<String> },
    /// Session-level failure.
    Error { message: String },
    /// The connection is gone.
    Closed { reason: Option<String> },
}

/// Messages sent to the remote session.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Realtime text turn (used for the opening prompt).
    Text(String),
    /// One frame of microphone audio.
    Audio(MediaChunk),
    /// Result of a [`FunctionCall`].
    ToolResponse {
        id: String,
        name: String,
        response: Value,
    },
}

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    /// `models/<name>`.
    pub model: String,
    pub system_instruction: String,
    pub voice_name: String,
    /// Function declarations offered to the model.
    pub tools: Vec<Value>,
    /// Ask the server to transcribe the user's audio.
    pub input_transcription: bool,
}

impl SessionSetup {
    /// Setup derived from config plus the booking tool.
    pub fn from_config(live: &crate::config::LiveConfig) -> Self {
        Self {
            model: live.qualified_model(),
            system_instruction: live.effective_instruction(),
            voice_name: live.voice_name.clone(),
            tools: vec![crate::persona::booking_tool_declaration()],
            input_transcription: true,
        }
    }
}

/// An open remote session.
///
/// Sending after the transport has stopped is a logged no-op. Closing is
/// idempotent, and dropping the connection closes it.
#[derive(Debug)]
pub struct LiveConnection {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    events: mpsc::Receiver<RemoteEvent>,
    cancel: CancellationToken,
}

impl LiveConnection {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        events: mpsc::Receiver<RemoteEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            events,
            cancel,
        }
    }

    /// Queue a message for the transport. Returns whether it was accepted.
    pub fn send(&self, message: OutboundMessage) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.outbound.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!("remote transport gone, dropping outbound message");
                false
            }
        }
    }

    /// Next remote event; `None` once the transport is finished.
    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens remote sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session and complete the setup handshake.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VoiceError::AuthorizationRequired`] or
    /// [`crate::VoiceError::ConnectionFailed`].
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection>;
}

/// Classify a remote failure message.
///
/// Entity/key-class failures (unknown model or project, invalid or missing
/// API key, permission) need re-authorization; anything else is a
/// connectivity problem of the given fallback kind.
pub fn classify_remote_error(message: &str, fallback: ErrorKind) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    const AUTH_MARKERS: [&str; 7] = [
        "entity",
        "api key",
        "api_key",
        "permission denied",
        "unauthenticated",
        "401",
        "403",
    ];
    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorKind::AuthorizationRequired
    } else {
        fallback
    }
}
