//! Widget-visible session state and its legal transitions.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// The one state the widget renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    AwaitingBooking,
    Success,
    Error(ErrorKind),
}

impl SessionState {
    /// Whether `self -> next` is allowed.
    ///
    /// Every state may return to `Idle` (`end()` is legal anywhere) and any
    /// state past `Idle` may fail. Self-transitions are not transitions.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{Active, AwaitingBooking, Connecting, Error, Idle, Success};
        match (self, next) {
            (a, b) if a == b => false,
            (_, Idle) => true,
            (Idle, Connecting) => true,
            (Idle, _) => false,
            (_, Error(_)) => true,
            (Connecting, Active) => true,
            (Active, AwaitingBooking) => true,
            (AwaitingBooking, Success) => true,
            // The agent withdrew the booking call.
            (AwaitingBooking, Active) => true,
            (Error(ErrorKind::NotificationDeliveryFailed), Active) => true,
            // The agent may book again after a confirmation.
            (Success, AwaitingBooking) => true,
            // Retry: full restart, or just the booking step.
            (Error(_), Connecting) => true,
            (Error(ErrorKind::NotificationDeliveryFailed), AwaitingBooking) => true,
            _ => false,
        }
    }

    /// Connecting or live; `start()` is rejected in these states.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Active | Self::AwaitingBooking)
    }

    /// A result card is showing (`dismiss()` applies).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }

    /// Wire label used by the host bridge.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::AwaitingBooking => "awaiting_booking",
            Self::Success => "success",
            Self::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(kind) => write!(f, "error({kind:?})"),
            other => f.write_str(other.as_str()),
        }
    }
}
