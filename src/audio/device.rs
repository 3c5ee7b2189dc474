//! Audio device contracts and PCM helpers.
//!
//! Devices exchange 16-bit little-endian PCM bytes with the session. All
//! methods take `&self` so the orchestrator can keep a handle for the final
//! close while a task drives the device; `close` must be idempotent.

use crate::error::Result;
use crate::pipeline::messages::StreamRead;
use async_trait::async_trait;

/// A microphone delivering fixed-size PCM chunks.
#[async_trait]
pub trait AudioInputDevice: Send + Sync {
    /// Next chunk of PCM bytes.
    async fn read_chunk(&self) -> StreamRead<Vec<u8>>;

    /// Stop capturing and release the device.
    async fn close(&self);
}

/// A speaker accepting PCM bytes.
#[async_trait]
pub trait AudioOutputDevice: Send + Sync {
    /// Queue `pcm` for playback. May block to pace playback in real time.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`](crate::SessionError::Device) if the
    /// device failed or was closed.
    async fn write(&self, pcm: &[u8]) -> Result<()>;

    /// Stop playback and release the device.
    async fn close(&self);
}

/// Encode `[-1.0, 1.0]` samples as 16-bit little-endian PCM.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into `[-1.0, 1.0]` samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / f32::from(i16::MAX))
        .collect()
}
