//! Outbound multiplexer: one bounded queue, one drain task.
//!
//! Capture frames, microphone chunks and typed commands all go through the
//! same queue, so the endpoint sees them in exactly the order they were
//! enqueued. The quit sentinel travels through the queue like any other
//! command and ends the drain when it reaches the front.

use super::channel::{PutError, QueueReceiver, QueueSender, Recv};
use super::messages::{OutboundItem, OutboundMessage};
use crate::audio::PlaybackQueue;
use crate::error::Result;
use crate::transport::SessionHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Whether `text` is the quit sentinel (trimmed, case-insensitive).
pub fn is_quit(text: &str, sentinel: &str) -> bool {
    text.trim().eq_ignore_ascii_case(sentinel.trim())
}

/// Why the drain stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainExit {
    /// The quit sentinel reached the front of the queue.
    Quit,
    /// Every producer is gone; nothing more can be sent.
    Exhausted,
    /// The session was cancelled.
    Cancelled,
}

/// Forwards queued items to the transport in FIFO order.
pub struct OutboundDrain {
    queue: QueueReceiver<OutboundItem>,
    transport: SessionHandle,
    quit_sentinel: String,
}

impl OutboundDrain {
    /// Create the drain.
    pub fn new(
        queue: QueueReceiver<OutboundItem>,
        transport: SessionHandle,
        quit_sentinel: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            transport,
            quit_sentinel: quit_sentinel.into(),
        }
    }

    /// Drain until quit, exhaustion or cancellation.
    ///
    /// On quit the session token is cancelled before the queue is released,
    /// so producers still blocked on a put observe cancellation rather than
    /// a closed queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`](crate::SessionError::Transport) if
    /// a send fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DrainExit> {
        let mut sent = 0u64;
        loop {
            let item = match self.queue.get(&cancel).await {
                Recv::Item(item) => item,
                Recv::Closed => {
                    info!(sent, "outbound queue exhausted");
                    return Ok(DrainExit::Exhausted);
                }
                Recv::Cancelled => return Ok(DrainExit::Cancelled),
            };

            let message = match item {
                OutboundItem::Text(text) if is_quit(&text, &self.quit_sentinel) => {
                    info!(sent, "quit requested");
                    cancel.cancel();
                    return Ok(DrainExit::Quit);
                }
                OutboundItem::Text(text) => OutboundMessage::ClientText {
                    text,
                    turn_complete: true,
                },
                OutboundItem::Media(chunk) => OutboundMessage::Realtime(chunk),
            };

            debug!(?message, "sending");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(DrainExit::Cancelled),
                result = self.transport.send(message) => result?,
            }
            sent += 1;
        }
    }
}

/// Moves UI commands into the outbound queue.
///
/// Whitespace-only commands are ignored. Any other command discards audio
/// that has not been played yet, since the user is talking over the agent.
/// When the command channel closes the relay enqueues the quit sentinel so
/// the session ends after everything queued before it.
pub struct CommandRelay {
    commands: mpsc::Receiver<String>,
    queue: QueueSender<OutboundItem>,
    playback: PlaybackQueue,
    quit_sentinel: String,
}

impl CommandRelay {
    /// Create the relay.
    pub fn new(
        commands: mpsc::Receiver<String>,
        queue: QueueSender<OutboundItem>,
        playback: PlaybackQueue,
        quit_sentinel: impl Into<String>,
    ) -> Self {
        Self {
            commands,
            queue,
            playback,
            quit_sentinel: quit_sentinel.into(),
        }
    }

    /// Relay until the UI goes away or the session is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Channel`](crate::SessionError::Channel) if the
    /// drain is gone while the session is still running.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let command = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                command = self.commands.recv() => command,
            };
            let text = match command {
                Some(text) => text,
                None => {
                    info!("command channel closed; ending session");
                    self.quit_sentinel.clone()
                }
            };
            let closing = is_quit(&text, &self.quit_sentinel);
            if text.trim().is_empty() {
                continue;
            }
            if !closing {
                let dropped = self.playback.flush();
                if dropped > 0 {
                    debug!(dropped, "user command interrupted playback");
                }
            }

            match self.queue.put(OutboundItem::Text(text), &cancel).await {
                Ok(()) => {}
                Err(PutError::Cancelled(_)) => return Ok(()),
                Err(e @ PutError::Closed(_)) => return Err(e.into()),
            }
            if closing {
                return Ok(());
            }
        }
    }
}
