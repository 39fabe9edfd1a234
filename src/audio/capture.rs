//! Microphone audio capture using cpal.
//!
//! Captures at the device's native sample rate, mixes down to mono,
//! resamples to the configured input rate (default 16kHz), and emits
//! fixed-size frames.
//!
//! The cpal stream lives on a dedicated thread because it is not `Send` on
//! every platform; the returned handle stops and joins that thread.

use super::pcm::{FrameAccumulator, resample, to_mono};
use super::{AudioInput, CaptureHandle, CapturedFrame};
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Microphone input via the default cpal host.
#[derive(Debug, Clone)]
pub struct CpalInput {
    config: AudioConfig,
}

impl CpalInput {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioInput for CpalInput {
    fn acquire(&self, tx: mpsc::Sender<CapturedFrame>) -> Result<Box<dyn CaptureHandle>> {
        let config = self.config.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("leadcall-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(&config, tx) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Hold the stream alive until released (message or sender dropped).
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCaptureHandle {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(VoiceError::PermissionDenied(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::PermissionDenied(
                    "capture thread exited before the microphone opened".into(),
                ))
            }
        }
    }
}

/// Find the device, build the stream, and start it. Runs on the capture thread.
fn build_input_stream(
    config: &AudioConfig,
    tx: mpsc::Sender<CapturedFrame>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.input_device {
        host.input_devices()
            .map_err(|e| format!("cannot enumerate devices: {e}"))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("input device '{name}' not found"))?
    } else {
        host.default_input_device()
            .ok_or_else(|| "no default input device".to_owned())?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    // Use the device's default config for best compatibility
    let default_config = device
        .default_input_config()
        .map_err(|e| format!("no default input config: {e}"))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let target_rate = config.input_sample_rate;

    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "native input config: {}Hz, {} channels -> {}Hz mono frames of {}",
        native_rate, native_channels, target_rate, config.frame_size
    );

    let mut framer = FrameAccumulator::new(config.frame_size);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let samples = if native_rate != target_rate {
                    resample(&mono, native_rate, target_rate)
                } else {
                    mono
                };

                for frame in framer.push(&samples) {
                    let frame = CapturedFrame {
                        samples: frame,
                        sample_rate: target_rate,
                        captured_at: Instant::now(),
                    };
                    // try_send keeps the audio thread from ever blocking.
                    if tx.try_send(frame).is_err() {
                        debug!("capture channel full or closed, dropping frame");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| format!("failed to build input stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start input stream: {e}"))?;

    info!("audio capture started");
    Ok(stream)
}

/// Stops the capture thread on release or drop.
struct CpalCaptureHandle {
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn release(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("capture thread panicked");
        }
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}
