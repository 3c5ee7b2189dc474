//! Speaker stage: playback queue → output device.
//!
//! The inbound demultiplexer pushes decoded audio into a [`PlaybackQueue`]
//! without ever waiting; the [`AudioOutputSink`] drains it one chunk at a
//! time. Barge-in is a [`PlaybackQueue::flush`] of everything not yet
//! handed to the device.

use super::device::AudioOutputDevice;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bounded FIFO of PCM chunks awaiting playback.
///
/// Pushing into a full queue evicts the oldest chunk. Cloning yields another
/// handle to the same queue.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

struct Inner {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
    capacity: usize,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl PlaybackQueue {
    /// Create a queue holding at most `capacity` chunks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                chunks: Mutex::new(VecDeque::new()),
                ready: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn chunks(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.inner
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Returns `true` if the oldest chunk was evicted.
    pub fn push(&self, pcm: Vec<u8>) -> bool {
        let evicted = {
            let mut chunks = self.chunks();
            let evicted = if chunks.len() >= self.inner.capacity {
                chunks.pop_front().is_some()
            } else {
                false
            };
            chunks.push_back(pcm);
            evicted
        };
        self.inner.ready.notify_one();
        evicted
    }

    /// Discard every queued chunk. Returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut chunks = self.chunks();
        let dropped = chunks.len();
        chunks.clear();
        dropped
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.chunks().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.chunks().is_empty()
    }

    /// Wait for the oldest chunk. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Vec<u8>> {
        loop {
            let next = self.chunks().pop_front();
            if let Some(chunk) = next {
                return Some(chunk);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = self.inner.ready.notified() => {}
            }
        }
    }
}

/// Drains a [`PlaybackQueue`] into an output device.
pub struct AudioOutputSink {
    device: Arc<dyn AudioOutputDevice>,
    queue: PlaybackQueue,
}

impl AudioOutputSink {
    /// Create the stage.
    pub fn new(device: Arc<dyn AudioOutputDevice>, queue: PlaybackQueue) -> Self {
        Self { device, queue }
    }

    /// Play until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Device`](crate::SessionError::Device) if a
    /// write fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("audio output started");
        let result = self.drain(&cancel).await;
        self.device.close().await;
        info!("audio output stopped");
        result
    }

    async fn drain(&self, cancel: &CancellationToken) -> Result<()> {
        while let Some(chunk) = self.queue.pop(cancel).await {
            debug!(bytes = chunk.len(), "playing chunk");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                written = self.device.write(&chunk) => written?,
            }
        }
        Ok(())
    }
}
