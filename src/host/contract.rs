//! Versioned host command/event envelopes for embedding the widget.

use crate::config::HostConfig;
use crate::runtime::WidgetEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands a host may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "widget.open")]
    WidgetOpen,
    #[serde(rename = "widget.close")]
    WidgetClose,
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "session.retry")]
    SessionRetry,
    #[serde(rename = "session.dismiss")]
    SessionDismiss,
    #[serde(rename = "session.status")]
    SessionStatus,
}

impl CommandName {
    pub const ALL: [CommandName; 8] = [
        Self::HostPing,
        Self::WidgetOpen,
        Self::WidgetClose,
        Self::SessionStart,
        Self::SessionEnd,
        Self::SessionRetry,
        Self::SessionDismiss,
        Self::SessionStatus,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::WidgetOpen => "widget.open",
            Self::WidgetClose => "widget.close",
            Self::SessionStart => "session.start",
            Self::SessionEnd => "session.end",
            Self::SessionRetry => "session.retry",
            Self::SessionDismiss => "session.dismiss",
            Self::SessionStatus => "session.status",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// A versioned command envelope from host -> widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(request_id: impl Into<String>, command: CommandName) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload: json!({}),
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {EVENT_VERSION}",
                    self.v
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned response envelope from widget -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned event envelope from widget -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
        }
    }

    /// Map a widget event to its wire form.
    ///
    /// Returns `None` for events the host opted out of (lifecycle
    /// notifications, level meter).
    #[must_use]
    pub fn from_widget(event: &WidgetEvent, host: &HostConfig) -> Option<Self> {
        let (name, payload) = match event {
            WidgetEvent::Opened if host.notify_lifecycle => ("widget.opened", json!({})),
            WidgetEvent::Closed if host.notify_lifecycle => ("widget.closed", json!({})),
            WidgetEvent::Opened | WidgetEvent::Closed => return None,
            WidgetEvent::StateChanged { state } => (
                "session.state",
                serde_json::to_value(state).unwrap_or_default(),
            ),
            WidgetEvent::Transcript { text } => ("session.transcript", json!({ "text": text })),
            WidgetEvent::OutputLevel { level } if host.emit_levels => {
                ("session.level", json!({ "level": level }))
            }
            WidgetEvent::OutputLevel { .. } => return None,
            WidgetEvent::Error { kind, message } => (
                "session.error",
                json!({
                    "kind": kind,
                    "message": message,
                    "user_message": kind.user_message(),
                }),
            ),
            WidgetEvent::BookingDelivered { request } => {
                ("booking.delivered", json!({ "booking": request }))
            }
            WidgetEvent::BookingRejected { missing } => {
                ("booking.rejected", json!({ "missing": missing }))
            }
            WidgetEvent::TimedOut => ("session.timed_out", json!({})),
        };
        Some(Self::new(name, payload))
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
