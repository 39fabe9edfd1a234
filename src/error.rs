//! Error types for the voice assistant.

use serde::{Deserialize, Serialize};

/// Top-level error type for the voice assistant.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Microphone could not be acquired (user declined or no usable device).
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The remote endpoint rejected the API key or entitlement.
    #[error("authorization required: {0}")]
    AuthorizationRequired(String),

    /// The remote session could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An open remote session failed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A booking tool call arrived without every required field.
    #[error("incomplete booking arguments: missing {}", .missing.join(", "))]
    IncompleteBookingArgs { missing: Vec<String> },

    /// The form relay did not accept the booking.
    #[error("notification delivery failed: {0}")]
    NotificationDeliveryFailed(String),

    /// The output device could not be opened.
    #[error("audio output unavailable: {0}")]
    AudioOutput(String),

    /// Audio decode or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Wire protocol (de)serialization error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// `start()` was called while a session is connecting or live.
    #[error("a voice session is already active")]
    SessionActive,

    /// An operation needed a live session and there is none.
    #[error("no active voice session")]
    NoSession,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl VoiceError {
    /// The user-facing error kind this error maps to, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            Self::AuthorizationRequired(_) => Some(ErrorKind::AuthorizationRequired),
            Self::ConnectionFailed(_) => Some(ErrorKind::ConnectionFailed),
            Self::ConnectionLost(_) => Some(ErrorKind::ConnectionLost),
            Self::IncompleteBookingArgs { .. } => Some(ErrorKind::IncompleteBookingArgs),
            Self::NotificationDeliveryFailed(_) => Some(ErrorKind::NotificationDeliveryFailed),
            Self::AudioOutput(_) => Some(ErrorKind::AudioOutputUnavailable),
            _ => None,
        }
    }
}

/// Distinct, reportable error kinds surfaced to the user interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Call-to-action: grant microphone access.
    PermissionDenied,
    /// Call-to-action: select or re-enter an API key.
    AuthorizationRequired,
    /// Call-to-action: retry the full start sequence.
    ConnectionFailed,
    /// Call-to-action: retry the full start sequence.
    ConnectionLost,
    /// Reported only; the conversation continues.
    IncompleteBookingArgs,
    /// Call-to-action: retry just the booking step.
    NotificationDeliveryFailed,
    /// Call-to-action: check the speaker/headphones.
    AudioOutputUnavailable,
}

impl ErrorKind {
    /// Whether the voice session stays alive while in this error.
    #[must_use]
    pub fn keeps_session(self) -> bool {
        matches!(self, Self::NotificationDeliveryFailed)
    }

    /// Short message suitable for the widget's error card.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "Microphone access is needed to talk to the consultant.",
            Self::AuthorizationRequired => "The voice service needs a valid API key.",
            Self::ConnectionFailed | Self::ConnectionLost => "Network error. Please retry.",
            Self::IncompleteBookingArgs => "Some booking details are still missing.",
            Self::NotificationDeliveryFailed => "We could not send your booking. Please retry.",
            Self::AudioOutputUnavailable => "No speaker is available for playback.",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
