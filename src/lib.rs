//! leadcall: a real-time voice assistant that qualifies sales leads.
//!
//! The visitor talks to a hosted speech-to-speech model; when the model has
//! collected the visitor's details it calls `bookDemoMeeting` and the
//! booking is relayed by email.
//!
//! # Architecture
//!
//! - **Audio** ([`audio`]): microphone capture and gapless playback via
//!   `cpal`, plus the PCM16/base64 bridge to the remote session
//! - **Live** ([`live`]): the Gemini Live WebSocket client
//! - **Session** ([`session`]): lifecycle and state machine of one call
//! - **Booking** ([`booking`]): tool-call validation and the form relay
//! - **Widget** ([`widget`]): the runtime loop driving a session from
//!   commands and broadcasting [`WidgetEvent`]s
//! - **Host** ([`host`]): versioned JSON envelopes over stdio for embedding

pub mod audio;
pub mod booking;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod live;
pub mod persona;
pub mod runtime;
pub mod session;
pub mod widget;

pub use config::AssistantConfig;
pub use error::{ErrorKind, Result, VoiceError};
pub use runtime::WidgetEvent;
pub use session::{Backends, SessionManager, SessionState};
pub use widget::{Widget, WidgetCommand, WidgetHandle};
