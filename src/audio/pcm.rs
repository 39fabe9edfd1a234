//! PCM conversions between the audio devices and the remote endpoint.
//!
//! Outbound audio is mono f32 at the input rate, sent as 16-bit
//! little-endian PCM in base64. Inbound audio is base64 16-bit PCM
//! (interleaved when multi-channel) decoded to planar f32.

use crate::error::{Result, VoiceError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

/// Base64 PCM payload with its MIME type, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded 16-bit little-endian samples.
    pub data: String,
}

impl MediaChunk {
    /// Sample rate declared by the MIME type, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        parse_pcm_rate(&self.mime_type)
    }
}

/// A decoded chunk of synthesized audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Average all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// MIME type for raw 16-bit PCM at `rate`.
pub fn pcm_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Extract `rate=<n>` from a PCM MIME type.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|v| v.trim().parse().ok())
        .filter(|rate| *rate > 0)
}

/// Convert f32 samples in \[-1, 1\] to 16-bit little-endian bytes.
///
/// Out-of-range input saturates instead of wrapping.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        // `as` saturates for f32 -> i16 and maps NaN to 0.
        let v = (s * 32768.0) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Convert 16-bit little-endian interleaved bytes to planar f32.
///
/// A trailing partial frame is dropped.
///
/// # Errors
///
/// Returns an error for odd byte counts or zero channels.
pub fn pcm16_le_to_planar(bytes: &[u8], channels: u16, sample_rate: u32) -> Result<PlaybackBuffer> {
    if channels == 0 {
        return Err(VoiceError::Audio("channel count must be at least 1".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Audio(format!("PCM16 payload has odd length {}", bytes.len())));
    }
    let ch = channels as usize;
    let frame_count = bytes.len() / 2 / ch;
    let mut planar = vec![Vec::with_capacity(frame_count); ch];
    for frame in bytes.chunks_exact(2 * ch).take(frame_count) {
        for (c, sample) in frame.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([sample[0], sample[1]]);
            planar[c].push(f32::from(v) / 32768.0);
        }
    }
    Ok(PlaybackBuffer {
        channels: planar,
        sample_rate,
    })
}

/// Encode mono f32 samples as a base64 PCM16 media chunk.
pub fn encode_media(samples: &[f32], sample_rate: u32) -> MediaChunk {
    MediaChunk {
        mime_type: pcm_mime(sample_rate),
        data: B64.encode(f32_to_pcm16_le(samples)),
    }
}

/// Decode a base64 PCM16 media chunk.
///
/// The sample rate comes from the MIME type when present, else `fallback_rate`.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64 or not valid PCM16.
pub fn decode_media(
    chunk: &MediaChunk,
    channels: u16,
    fallback_rate: u32,
) -> Result<PlaybackBuffer> {
    let bytes = B64
        .decode(chunk.data.as_bytes())
        .map_err(|e| VoiceError::Audio(format!("invalid base64 audio: {e}")))?;
    let rate = chunk.sample_rate().unwrap_or(fallback_rate);
    pcm16_le_to_planar(&bytes, channels, rate)
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation resampler.
///
/// Speech energy sits below 8kHz, so no anti-alias filter is applied when
/// going from 48kHz down to 16kHz.
pub fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// Root-mean-square amplitude.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Groups a stream of samples into fixed-size frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
