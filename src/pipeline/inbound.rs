//! Inbound demultiplexer: routes each received sub-event to its consumer.

use super::messages::{InboundEvent, OutboundMessage, StreamRead};
use crate::audio::PlaybackQueue;
use crate::bridge::{Notification, Notifier};
use crate::error::{Result, SessionError};
use crate::tools::ToolCallDispatcher;
use crate::transport::SessionHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Log target for endpoint-side code execution.
const DIAGNOSTICS: &str = "duplex_agent::diagnostics";

/// Reads the endpoint's turns and fans them out.
///
/// Audio goes to the playback queue. Text, tool calls, interruptions and
/// turn boundaries flush whatever audio is still queued before anything
/// else happens. Tool calls are answered inline, one response per request.
pub struct InboundDemultiplexer {
    transport: SessionHandle,
    playback: PlaybackQueue,
    dispatcher: ToolCallDispatcher,
    notifier: Notifier,
    flush_on_turn_complete: bool,
}

impl InboundDemultiplexer {
    /// Create the demultiplexer.
    pub fn new(
        transport: SessionHandle,
        playback: PlaybackQueue,
        dispatcher: ToolCallDispatcher,
        notifier: Notifier,
    ) -> Self {
        Self {
            transport,
            playback,
            dispatcher,
            notifier,
            flush_on_turn_complete: true,
        }
    }

    /// Whether a completed turn discards unplayed audio (default `true`).
    pub fn with_flush_on_turn_complete(mut self, enabled: bool) -> Self {
        self.flush_on_turn_complete = enabled;
        self
    }

    /// Receive until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] when receiving fails or the
    /// endpoint closes the session, or when a tool response cannot be sent.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut turns = 0u64;
        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                read = self.transport.receive() => read,
            };
            let event = match read {
                StreamRead::Item(event) => event,
                StreamRead::EndOfStream => {
                    return Err(SessionError::Transport(
                        "endpoint closed the session".into(),
                    ));
                }
                StreamRead::Failed(cause) => return Err(SessionError::Transport(cause)),
            };
            if matches!(event, InboundEvent::TurnComplete) {
                turns += 1;
                debug!(turns, "turn complete");
            }
            if !self.handle(event, &cancel).await? {
                return Ok(());
            }
        }
    }

    /// Route one event. Returns `false` if cancellation interrupted it.
    async fn handle(&self, event: InboundEvent, cancel: &CancellationToken) -> Result<bool> {
        match event {
            InboundEvent::Audio { data, sample_rate } => {
                if self.playback.push(data) {
                    debug!(sample_rate, "playback queue full, dropped oldest chunk");
                }
            }
            InboundEvent::Text(text) => {
                self.flush("text");
                info!(chars = text.len(), "agent text");
                self.notifier.notify(Notification::AgentText(text));
            }
            InboundEvent::ExecutableCode { language, code } => {
                info!(target: DIAGNOSTICS, %language, "executable code:\n{code}");
            }
            InboundEvent::CodeExecutionResult { outcome, output } => {
                info!(target: DIAGNOSTICS, %outcome, "code execution result:\n{output}");
            }
            InboundEvent::ToolCall(requests) => {
                self.flush("tool call");
                for request in requests {
                    let Some(response) = self.dispatcher.dispatch(request, cancel).await else {
                        return Ok(false);
                    };
                    debug!(id = %response.id, tool = %response.name, "sending tool response");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Ok(false),
                        sent = self.transport.send(OutboundMessage::ToolResponse(response)) => sent?,
                    }
                }
            }
            InboundEvent::ToolCallCancellation(ids) => {
                // Calls are answered inline, so nothing is still running.
                info!(?ids, "endpoint withdrew tool calls");
            }
            InboundEvent::Interrupted => self.flush("interrupted"),
            InboundEvent::TurnComplete => {
                if self.flush_on_turn_complete {
                    self.flush("turn complete");
                }
            }
            InboundEvent::ServerEvent(summary) => debug!(%summary, "server event"),
        }
        Ok(true)
    }

    fn flush(&self, reason: &str) {
        let dropped = self.playback.flush();
        if dropped > 0 {
            debug!(dropped, reason, "flushed playback queue");
        }
    }
}
