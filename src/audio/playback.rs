//! Speaker playback using cpal.
//!
//! A dedicated thread owns the output stream; its callback drains a shared
//! sample buffer and pads with silence. [`CpalOutput::write`] appends to that
//! buffer and then waits until it is nearly drained, so writes pace at
//! real-time speed and queued audio stays in the session's playback queue
//! where a barge-in flush can reach it.

use super::device::{AudioOutputDevice, pcm16_to_f32};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info};

/// How often `write` re-checks the buffer level.
const DRAIN_POLL: Duration = Duration::from_millis(10);

struct Shared {
    samples: Mutex<VecDeque<f32>>,
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn samples(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// System speaker.
pub struct CpalOutput {
    shared: Arc<Shared>,
    channels: u16,
    low_water: usize,
    closed: AtomicBool,
    stop: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl CpalOutput {
    /// Open the named output device (or the default one) for interleaved
    /// playback at `sample_rate`.
    ///
    /// Blocks while the stream is built; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] if the device is missing or the
    /// stream cannot be started.
    pub fn open(device_name: Option<String>, sample_rate: u32, channels: u16) -> Result<Self> {
        let shared = Arc::new(Shared {
            samples: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
        });
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let stream_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("duplex-speaker".into())
            .spawn(move || {
                let stream =
                    match build_stream(device_name.as_deref(), sample_rate, channels, stream_shared)
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio playback stopped");
            })
            .map_err(|e| SessionError::Device(format!("cannot spawn playback thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SessionError::Device("playback thread exited during setup".into()))??;

        Ok(Self {
            shared,
            channels: channels.max(1),
            // ~50 ms of audio left in the device buffer before write returns.
            low_water: (sample_rate as usize / 20) * usize::from(channels.max(1)),
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SessionError::Device(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Device("output device closed".into()));
        }
        match self.shared.failure() {
            Some(cause) => Err(SessionError::Device(cause)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AudioOutputDevice for CpalOutput {
    async fn write(&self, pcm: &[u8]) -> Result<()> {
        self.check()?;
        let samples = pcm16_to_f32(pcm);
        {
            let mut buffer = self.shared.samples();
            if self.channels > 1 {
                for s in samples {
                    buffer.extend(std::iter::repeat_n(s, usize::from(self.channels)));
                }
            } else {
                buffer.extend(samples);
            }
        }
        loop {
            let queued = self.shared.samples().len();
            if queued <= self.low_water {
                return Ok(());
            }
            tokio::time::sleep(DRAIN_POLL).await;
            self.check()?;
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shared.samples().clear();
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
    sample_rate: u32,
    channels: u16,
    shared: Arc<Shared>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.output_devices()
            .map_err(|e| SessionError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SessionError::Device(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| SessionError::Device("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name} at {sample_rate}Hz, {channels} channels");

    let stream_config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let err_shared = Arc::clone(&shared);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buffer = shared.samples();
                for sample in data.iter_mut() {
                    *sample = buffer.pop_front().unwrap_or(0.0);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
                *err_shared
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| SessionError::Device(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SessionError::Device(format!("failed to start output stream: {e}")))?;
    info!("audio playback started");
    Ok(stream)
}
