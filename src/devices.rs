//! Opens the devices a session needs.

use crate::audio::capture::CpalInput;
use crate::audio::playback::CpalOutput;
use crate::audio::{AudioInputDevice, AudioOutputDevice};
use crate::capture::{CommandGrabber, FrameDevice};
use crate::config::{AudioConfig, CaptureMode};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use std::sync::Arc;

/// Factory for the session's devices.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Open the microphone.
    async fn open_input(
        &self,
        sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Result<Arc<dyn AudioInputDevice>>;

    /// Open the speaker.
    async fn open_output(&self, sample_rate: u32, channels: u16)
    -> Result<Arc<dyn AudioOutputDevice>>;

    /// Open the frame source for `mode`; `None` when the mode has no frames.
    async fn open_capture(&self, mode: CaptureMode) -> Result<Option<Arc<dyn FrameDevice>>>;
}

/// Real devices: cpal audio and command-line frame grabbers.
#[derive(Debug, Clone, Default)]
pub struct SystemDevices {
    input_device: Option<String>,
    output_device: Option<String>,
    camera_index: u32,
}

impl SystemDevices {
    /// Use the device names from `audio` and the camera at `camera_index`.
    pub fn new(audio: &AudioConfig, camera_index: u32) -> Self {
        Self {
            input_device: audio.input_device.clone(),
            output_device: audio.output_device.clone(),
            camera_index,
        }
    }
}

fn joined<T>(result: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    result.map_err(|e| SessionError::Device(format!("device setup task failed: {e}")))?
}

#[async_trait]
impl DeviceProvider for SystemDevices {
    async fn open_input(
        &self,
        sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Result<Arc<dyn AudioInputDevice>> {
        let name = self.input_device.clone();
        let input = joined(
            tokio::task::spawn_blocking(move || {
                CpalInput::open(name, sample_rate, channels, chunk_frames)
            })
            .await,
        )?;
        Ok(Arc::new(input))
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Arc<dyn AudioOutputDevice>> {
        let name = self.output_device.clone();
        let output = joined(
            tokio::task::spawn_blocking(move || CpalOutput::open(name, sample_rate, channels))
                .await,
        )?;
        Ok(Arc::new(output))
    }

    async fn open_capture(&self, mode: CaptureMode) -> Result<Option<Arc<dyn FrameDevice>>> {
        let grabber = CommandGrabber::for_mode(mode, self.camera_index)?;
        Ok(grabber.map(|g| Arc::new(g) as Arc<dyn FrameDevice>))
    }
}

/// Names of the available input and output audio devices.
///
/// # Errors
///
/// Returns [`SessionError::Device`] if enumeration fails.
pub fn list_audio_devices() -> Result<(Vec<String>, Vec<String>)> {
    Ok((CpalInput::list_devices()?, CpalOutput::list_devices()?))
}
