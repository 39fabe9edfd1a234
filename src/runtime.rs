//! Events emitted by the widget for UI and host integrations.
//!
//! Kept lightweight (no audio payloads) so the session loop can broadcast
//! without blocking.

use crate::booking::BookingRequest;
use crate::error::ErrorKind;
use crate::session::SessionState;

/// Events that describe what the widget is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    /// The widget surface was opened.
    Opened,
    /// The widget surface was closed.
    Closed,
    /// Session state changed.
    StateChanged { state: SessionState },
    /// The running transcript of what the visitor said grew.
    Transcript { text: String },
    /// Assistant output amplitude (0..1) for the visual indicator.
    OutputLevel { level: f32 },
    /// A reportable error; `kind` picks the call-to-action.
    Error { kind: ErrorKind, message: String },
    /// The booking reached the form relay.
    BookingDelivered { request: BookingRequest },
    /// A booking tool call was missing required fields.
    BookingRejected { missing: Vec<String> },
    /// The session was ended for inactivity.
    TimedOut,
}
