//! Microphone stage: device chunks → outbound queue.

use super::device::AudioInputDevice;
use crate::error::{Result, SessionError};
use crate::pipeline::channel::{PutError, QueueSender};
use crate::pipeline::messages::{MediaChunk, OutboundItem, StreamRead};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reads fixed-size PCM chunks and enqueues them as audio media.
///
/// A full outbound queue blocks the loop, which is the intended throttle.
pub struct AudioInputSource {
    device: Arc<dyn AudioInputDevice>,
    sample_rate: u32,
    queue: QueueSender<OutboundItem>,
}

impl AudioInputSource {
    /// Create the stage.
    pub fn new(
        device: Arc<dyn AudioInputDevice>,
        sample_rate: u32,
        queue: QueueSender<OutboundItem>,
    ) -> Self {
        Self {
            device,
            sample_rate,
            queue,
        }
    }

    /// Run until cancelled or the microphone fails.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`] on a read failure or if the
    /// microphone stream ends, and [`SessionError::Channel`] if the outbound
    /// queue consumer is gone.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(rate = self.sample_rate, "audio input started");
        let result = self.pump(&cancel).await;
        self.device.close().await;
        info!("audio input stopped");
        result
    }

    async fn pump(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                read = self.device.read_chunk() => read,
            };
            let data = match read {
                StreamRead::Item(data) => data,
                StreamRead::EndOfStream => {
                    return Err(SessionError::Device("microphone stream ended".into()));
                }
                StreamRead::Failed(cause) => return Err(SessionError::Device(cause)),
            };
            debug!(bytes = data.len(), "mic chunk");
            let item = OutboundItem::Media(MediaChunk::Audio {
                data,
                sample_rate: self.sample_rate,
            });
            match self.queue.put(item, cancel).await {
                Ok(()) => {}
                Err(PutError::Cancelled(_)) => return Ok(()),
                Err(e @ PutError::Closed(_)) => return Err(e.into()),
            }
        }
    }
}
