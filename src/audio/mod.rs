//! Audio capture, playback, and the PCM bridge to the remote endpoint.
//!
//! Devices sit behind [`AudioInput`] and [`AudioOutput`] so the session can
//! be driven by cpal in production and by fakes in tests.

pub mod bridge;
pub mod capture;
pub mod pcm;
pub mod playback;

use crate::error::Result;
use std::time::Instant;
use tokio::sync::mpsc;

pub use bridge::{AudioBridge, ScheduledPlayback};
pub use pcm::{MediaChunk, PlaybackBuffer};

/// A fixed-size frame of microphone samples.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When the last sample of this frame was captured.
    pub captured_at: Instant,
}

/// Identifier of one scheduled playback source.
pub type SourceId = u64;

/// A microphone that can be exclusively acquired.
pub trait AudioInput: Send + Sync {
    /// Start capturing into `tx`.
    ///
    /// Capture must never block on `tx`; a full channel drops the frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VoiceError::PermissionDenied`] when the microphone
    /// cannot be acquired.
    fn acquire(&self, tx: mpsc::Sender<CapturedFrame>) -> Result<Box<dyn CaptureHandle>>;
}

/// An acquired microphone. Releasing twice is a no-op.
pub trait CaptureHandle: Send {
    fn release(&mut self);
}

/// A speaker that can be exclusively opened.
pub trait AudioOutput: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::VoiceError::AudioOutput`] when no output is available.
    fn open(&self) -> Result<Box<dyn PlaybackDevice>>;
}

/// An open output device with a monotonic playback clock.
///
/// Sources are started at absolute clock times and stopped individually.
pub trait PlaybackDevice: Send {
    /// Seconds of audio rendered since the device opened.
    fn current_time(&self) -> f64;
    /// Schedule `buffer` to start at clock time `at` (or now, if `at` is past).
    fn start(&mut self, buffer: &PlaybackBuffer, at: f64) -> SourceId;
    /// Stop a source; unknown or finished ids are ignored.
    fn stop(&mut self, id: SourceId);
    /// Sources that finished playing since the last call.
    fn take_ended(&mut self) -> Vec<SourceId>;
    /// Smoothed output amplitude in \[0, 1\].
    fn level(&self) -> f32;
    /// Stop everything and release the device. Idempotent.
    fn close(&mut self);
}
