//! Audio playback to system speakers via cpal.
//!
//! The output stream pulls from a [`Mixer`]: sources are placed at absolute
//! frame positions on a frame-counter clock and summed as the clock passes
//! them. Scheduling a source never blocks on playback.

use super::pcm::{PlaybackBuffer, resample, rms};
use super::{AudioOutput, PlaybackDevice, SourceId};
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{error, info};

/// Weight of the previous level when smoothing the output meter.
const LEVEL_DECAY: f32 = 0.6;

/// Sample-accurate mixer driven by the output callback.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    rendered_frames: u64,
    sources: Vec<MixSource>,
    ended: Vec<SourceId>,
    level: f32,
    next_id: SourceId,
}

#[derive(Debug)]
struct MixSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl MixSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            rendered_frames: 0,
            sources: Vec::new(),
            ended: Vec::new(),
            level: 0.0,
            next_id: 1,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.rendered_frames as f64 / f64::from(self.sample_rate)
    }

    /// Place mono samples (at the mixer rate) at clock time `at`.
    ///
    /// A start time in the past starts at the next rendered frame.
    pub fn schedule(&mut self, samples: Vec<f32>, at: f64) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        let requested = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.sources.push(MixSource {
            id,
            start_frame: requested.max(self.rendered_frames),
            samples,
        });
        id
    }

    /// Remove a source. Returns whether it was still scheduled.
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        before != self.sources.len()
    }

    pub fn stop_all(&mut self) {
        self.sources.clear();
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: u16) {
        let ch = channels.max(1) as usize;
        let frames = out.len() / ch;
        let block_start = self.rendered_frames;
        let block_end = block_start + frames as u64;

        let mut mixed = vec![0.0f32; frames];
        for src in &self.sources {
            let from = src.start_frame.max(block_start);
            let to = src.end_frame().min(block_end);
            for frame in from..to {
                let src_idx = (frame - src.start_frame) as usize;
                let out_idx = (frame - block_start) as usize;
                mixed[out_idx] += src.samples[src_idx];
            }
        }

        for (i, frame) in out.chunks_exact_mut(ch).enumerate() {
            let v = mixed[i].clamp(-1.0, 1.0);
            frame.fill(v);
        }
        // Any remainder smaller than a frame is silence.
        for s in out.iter_mut().skip(frames * ch) {
            *s = 0.0;
        }

        self.rendered_frames = block_end;
        let (done, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sources)
            .into_iter()
            .partition(|s| s.end_frame() <= block_end);
        self.sources = live;
        self.ended.extend(done.into_iter().map(|s| s.id));

        let block_level = rms(&mixed).min(1.0);
        self.level = self.level * LEVEL_DECAY + block_level * (1.0 - LEVEL_DECAY);
    }

    /// Sources that played to completion since the last call.
    pub fn take_ended(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.ended)
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

/// Speaker output via the default cpal host.
#[derive(Debug, Clone)]
pub struct CpalOutput {
    config: AudioConfig,
}

impl CpalOutput {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

impl AudioOutput for CpalOutput {
    fn open(&self) -> Result<Box<dyn PlaybackDevice>> {
        let config = self.config.clone();
        let mixer = Arc::new(Mutex::new(Mixer::new(config.output_sample_rate)));
        let stream_mixer = Arc::clone(&mixer);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("leadcall-playback".into())
            .spawn(move || {
                let stream = match build_output_stream(&config, stream_mixer) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio playback stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalPlayback {
                mixer,
                sample_rate: self.config.output_sample_rate.max(1),
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(VoiceError::AudioOutput(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::AudioOutput(
                    "playback thread exited before the device opened".into(),
                ))
            }
        }
    }
}

fn build_output_stream(
    config: &AudioConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.output_device {
        host.output_devices()
            .map_err(|e| format!("cannot enumerate devices: {e}"))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("output device '{name}' not found"))?
    } else {
        host.default_output_device()
            .ok_or_else(|| "no default output device".to_owned())?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: config.output_sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut m = match mixer.lock() {
                    Ok(m) => m,
                    Err(_) => {
                        data.fill(0.0);
                        return;
                    }
                };
                m.render(data, 1);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| format!("failed to build output stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start output stream: {e}"))?;

    Ok(stream)
}

/// Mono samples of `buffer` at the mixer rate.
fn source_samples(buffer: &PlaybackBuffer, mixer_rate: u32) -> Vec<f32> {
    resample(&buffer.to_mono(), buffer.sample_rate, mixer_rate)
}

/// An open cpal output stream and its mixer.
struct CpalPlayback {
    mixer: Arc<Mutex<Mixer>>,
    /// Rate of the mixer clock.
    sample_rate: u32,
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        match self.mixer.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.mixer().current_time()
    }

    fn start(&mut self, buffer: &PlaybackBuffer, at: f64) -> SourceId {
        // Convert before locking; the output callback shares the mixer.
        let samples = source_samples(buffer, self.sample_rate);
        self.mixer().schedule(samples, at)
    }

    fn stop(&mut self, id: SourceId) {
        self.mixer().stop(id);
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        self.mixer().take_ended()
    }

    fn level(&self) -> f32 {
        self.mixer().level()
    }

    fn close(&mut self) {
        self.mixer().stop_all();
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("playback thread panicked");
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}
