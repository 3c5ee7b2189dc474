//! Camera / screen stage: frames → JPEG → outbound queue.
//!
//! One frame per pacing interval regardless of how fast the device is. A
//! device that runs out of frames or fails to produce one ends this stage
//! normally; the session keeps going.

pub mod encoder;
pub mod grabber;

pub use encoder::FrameEncoder;
pub use grabber::CommandGrabber;

use crate::error::{Result, SessionError};
use crate::pipeline::channel::{PutError, QueueSender};
use crate::pipeline::messages::{MediaChunk, OutboundItem, StreamRead};
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A source of still frames.
#[async_trait]
pub trait FrameDevice: Send + Sync {
    /// Acquire the next frame.
    async fn read_frame(&self) -> StreamRead<DynamicImage>;

    /// Release the device. Must be idempotent.
    async fn close(&self);
}

/// Paced frame producer.
pub struct CaptureSource {
    device: Arc<dyn FrameDevice>,
    encoder: FrameEncoder,
    interval: Duration,
    queue: QueueSender<OutboundItem>,
}

impl CaptureSource {
    /// Create the stage.
    pub fn new(
        device: Arc<dyn FrameDevice>,
        encoder: FrameEncoder,
        interval: Duration,
        queue: QueueSender<OutboundItem>,
    ) -> Self {
        Self {
            device,
            encoder,
            interval,
            queue,
        }
    }

    /// Run until the device is exhausted or fails, or the session is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Channel`] if the outbound queue consumer is
    /// gone.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "frame capture started");
        let result = self.pump(&cancel).await;
        self.device.close().await;
        info!("frame capture stopped");
        result
    }

    async fn pump(&self, cancel: &CancellationToken) -> Result<()> {
        let mut frames = 0u64;
        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                read = self.device.read_frame() => read,
            };
            let frame = match read {
                StreamRead::Item(frame) => frame,
                StreamRead::EndOfStream => {
                    info!(frames, "frame source exhausted");
                    return Ok(());
                }
                StreamRead::Failed(cause) => {
                    warn!(frames, %cause, "frame acquisition failed, stopping capture");
                    return Ok(());
                }
            };

            let encoder = self.encoder;
            let encoded = tokio::task::spawn_blocking(move || encoder.encode(&frame))
                .await
                .map_err(|e| SessionError::Encode(format!("encoder task failed: {e}")))
                .and_then(|r| r);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.interval) => {}
            }

            let data = match encoded {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "skipping frame");
                    continue;
                }
            };
            debug!(bytes = data.len(), "frame encoded");
            let item = OutboundItem::Media(MediaChunk::Image {
                data,
                mime_type: "image/jpeg".to_owned(),
            });
            match self.queue.put(item, cancel).await {
                Ok(()) => frames += 1,
                Err(PutError::Cancelled(_)) => return Ok(()),
                Err(e @ PutError::Closed(_)) => return Err(e.into()),
            }
        }
    }
}
