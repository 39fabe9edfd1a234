//! Audio bridge between the devices and the remote session.
//!
//! Outbound, captured frames become base64 PCM16 media chunks. Inbound,
//! media chunks are decoded and scheduled on the playback clock so that
//! successive chunks play back to back: each starts at
//! `max(now, next_free_slot)` and pushes `next_free_slot` forward by its
//! duration. An interruption stops every pending source and pulls
//! `next_free_slot` back to the current clock time.
//!
//! The bridge owns every source it schedules; each one is released on
//! natural completion ([`AudioBridge::reap_finished`]), on interruption, or
//! on [`AudioBridge::shutdown`] / drop.

use super::pcm::{self, MediaChunk, PlaybackBuffer};
use super::{PlaybackDevice, SourceId};
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Where and for how long one chunk was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub source: SourceId,
    /// Clock time in seconds.
    pub start: f64,
    /// Seconds.
    pub duration: f64,
}

impl ScheduledPlayback {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct AudioBridge {
    input_sample_rate: u32,
    output_sample_rate: u32,
    output_channels: u16,
    device: Option<Box<dyn PlaybackDevice>>,
    next_free_slot: f64,
    scheduled: BTreeMap<SourceId, ScheduledPlayback>,
}

impl AudioBridge {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            output_channels: config.output_channels.max(1),
            device: None,
            next_free_slot: 0.0,
            scheduled: BTreeMap::new(),
        }
    }

    /// Take ownership of an opened output device, releasing any previous one.
    pub fn attach(&mut self, device: Box<dyn PlaybackDevice>) {
        self.shutdown();
        self.device = Some(device);
    }

    pub fn is_attached(&self) -> bool {
        self.device.is_some()
    }

    /// Encode one captured frame for the remote session.
    pub fn encode_frame(&self, samples: &[f32]) -> MediaChunk {
        pcm::encode_media(samples, self.input_sample_rate)
    }

    /// Decode an inbound chunk and schedule it after everything queued.
    ///
    /// Returns `Ok(None)` for chunks with no whole frames.
    ///
    /// # Errors
    ///
    /// Returns an error if no device is attached or the chunk does not decode.
    pub fn enqueue(&mut self, chunk: &MediaChunk) -> Result<Option<ScheduledPlayback>> {
        let buffer = pcm::decode_media(chunk, self.output_channels, self.output_sample_rate)?;
        self.enqueue_buffer(&buffer)
    }

    /// Schedule an already-decoded buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if no device is attached.
    pub fn enqueue_buffer(&mut self, buffer: &PlaybackBuffer) -> Result<Option<ScheduledPlayback>> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| VoiceError::Audio("no output device attached".into()))?;
        if buffer.is_empty() {
            return Ok(None);
        }

        let now = device.current_time();
        let start = now.max(self.next_free_slot);
        let duration = buffer.duration();
        let source = device.start(buffer, start);
        self.next_free_slot = start + duration;

        let scheduled = ScheduledPlayback {
            source,
            start,
            duration,
        };
        self.scheduled.insert(source, scheduled);
        trace!(
            source,
            start,
            duration,
            pending = self.scheduled.len(),
            "scheduled playback"
        );
        Ok(Some(scheduled))
    }

    /// Stop and discard every scheduled source and reset the slot clock to now.
    ///
    /// Returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let Some(device) = self.device.as_mut() else {
            self.scheduled.clear();
            self.next_free_slot = 0.0;
            return 0;
        };
        let stopped = self.scheduled.len();
        for id in std::mem::take(&mut self.scheduled).into_keys() {
            device.stop(id);
        }
        // Drop completion notices for the sources just discarded.
        let _ = device.take_ended();
        self.next_free_slot = device.current_time();
        debug!(stopped, resume_at = self.next_free_slot, "playback interrupted");
        stopped
    }

    /// Forget sources that finished playing. Returns how many were removed.
    pub fn reap_finished(&mut self) -> usize {
        let Some(device) = self.device.as_mut() else {
            return 0;
        };
        let ended = device.take_ended();
        let mut removed = 0;
        for id in ended {
            if self.scheduled.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Sources scheduled and not yet known to have finished.
    pub fn pending_sources(&self) -> usize {
        self.scheduled.len()
    }

    /// Clock time at which the next chunk would start if it arrived early.
    pub fn next_free_slot(&self) -> f64 {
        self.next_free_slot
    }

    /// Current playback clock time, or 0 when detached.
    pub fn current_time(&self) -> f64 {
        self.device.as_ref().map_or(0.0, |d| d.current_time())
    }

    /// Output amplitude for the visual indicator, 0 when detached.
    pub fn output_level(&self) -> f32 {
        self.device.as_ref().map_or(0.0, |d| d.level())
    }

    /// Stop every source, close the device, and reset the clock. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut device) = self.device.take() {
            for id in std::mem::take(&mut self.scheduled).into_keys() {
                device.stop(id);
            }
            device.close();
        }
        self.scheduled.clear();
        self.next_free_slot = 0.0;
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
