//! Microphone capture using cpal.
//!
//! Captures at the device's native rate and channel count, downmixes to mono
//! and downsamples to the session send rate, then hands out fixed-size
//! 16-bit PCM chunks.
//!
//! A cpal stream cannot move between threads, so each [`CpalInput`] owns a
//! dedicated thread that holds the stream until the device is closed.

use super::device::{AudioInputDevice, f32_to_pcm16};
use crate::error::{Result, SessionError};
use crate::pipeline::messages::StreamRead;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Buffers in flight between the audio callback and the reader.
const CALLBACK_BUFFERS: usize = 64;

enum InputEvent {
    Samples(Vec<f32>),
    Error(String),
}

struct InputState {
    rx: mpsc::Receiver<InputEvent>,
    pending: Vec<f32>,
}

/// System microphone.
pub struct CpalInput {
    state: tokio::sync::Mutex<InputState>,
    chunk_samples: usize,
    stop: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl CpalInput {
    /// Open the named input device (or the default one) and start capturing.
    ///
    /// Blocks while the stream is built; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] if the device is missing or the
    /// stream cannot be started.
    pub fn open(
        device_name: Option<String>,
        sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(CALLBACK_BUFFERS);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("duplex-mic".into())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), sample_rate, channels, tx)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns once the sender is used or dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })
            .map_err(|e| SessionError::Device(format!("cannot spawn capture thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SessionError::Device("capture thread exited during setup".into()))??;

        Ok(Self {
            state: tokio::sync::Mutex::new(InputState {
                rx,
                pending: Vec::new(),
            }),
            chunk_samples: chunk_frames.max(1) * usize::from(channels.max(1)),
            stop: Mutex::new(Some(stop_tx)),
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SessionError::Device(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }
}

#[async_trait]
impl AudioInputDevice for CpalInput {
    async fn read_chunk(&self) -> StreamRead<Vec<u8>> {
        let mut state = self.state.lock().await;
        loop {
            if state.pending.len() >= self.chunk_samples {
                let chunk: Vec<f32> = state.pending.drain(..self.chunk_samples).collect();
                return StreamRead::Item(f32_to_pcm16(&chunk));
            }
            match state.rx.recv().await {
                Some(InputEvent::Samples(samples)) => state.pending.extend(samples),
                Some(InputEvent::Error(e)) => return StreamRead::Failed(e),
                None => return StreamRead::EndOfStream,
            }
        }
    }

    async fn close(&self) {
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    target_rate: u32,
    target_channels: u16,
    tx: mpsc::Sender<InputEvent>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| SessionError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SessionError::Device(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| SessionError::Device("no default input device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    // The device's default config is the most widely supported.
    let default_config = device
        .default_input_config()
        .map_err(|e| SessionError::Device(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        "native input config: {}Hz, {} channels -> {}Hz, {} channels",
        native_rate, native_channels, target_rate, target_channels
    );

    let err_tx = tx.clone();
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let resampled = downsample(&mono, native_rate, target_rate);
                let samples = upmix(resampled, target_channels);
                // Never block the audio thread.
                if tx.try_send(InputEvent::Samples(samples)).is_err() {
                    debug!("capture buffer full, dropping samples");
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
                let _ = err_tx.try_send(InputEvent::Error(err.to_string()));
            },
            None,
        )
        .map_err(|e| SessionError::Device(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SessionError::Device(format!("failed to start input stream: {e}")))?;
    info!("audio capture started");
    Ok(stream)
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels);
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Duplicate mono samples across `channels` interleaved channels.
fn upmix(mono: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return mono;
    }
    mono.into_iter()
        .flat_map(|s| std::iter::repeat_n(s, usize::from(channels)))
        .collect()
}

/// Linear-interpolation resampler. Speech energy sits below 8 kHz, so no
/// anti-alias filter is applied when going down to 16 kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
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
