//! Routes tool-call requests to registered handlers.

use super::ToolRegistry;
use crate::bridge::{Notification, Notifier};
use crate::error::SessionError;
use crate::pipeline::messages::{ToolCallRequest, ToolCallResponse, ToolOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Answers each tool call with exactly one response carrying the request id.
#[derive(Debug, Clone)]
pub struct ToolCallDispatcher {
    registry: Arc<ToolRegistry>,
    notifier: Notifier,
}

impl ToolCallDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ToolRegistry>, notifier: Notifier) -> Self {
        Self { registry, notifier }
    }

    /// Run one request to completion.
    ///
    /// Unknown names get the generic acknowledgement. Handler errors and
    /// panics become error-shaped payloads. Returns `None` only when
    /// `cancel` fires before the handler finishes; no response is owed then.
    pub async fn dispatch(
        &self,
        request: ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Option<ToolCallResponse> {
        let ToolCallRequest {
            id,
            name,
            arguments,
        } = request;

        let outcome = match self.registry.get(&name) {
            None => {
                let e = SessionError::UnknownTool(name.clone());
                warn!(%id, "{e}; acknowledging");
                ToolOutcome::acknowledged()
            }
            Some(handler) => {
                info!(%id, tool = %name, "dispatching tool call");
                let task = tokio::task::spawn_blocking(move || handler.call(arguments));
                let joined = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(%id, tool = %name, "tool call abandoned on cancellation");
                        return None;
                    }
                    joined = task => joined,
                };
                match joined {
                    Ok(Ok(value)) => ToolOutcome::Result(value),
                    Ok(Err(e)) => {
                        warn!(%id, tool = %name, error = %e, "tool handler failed");
                        ToolOutcome::Error(handler_message(e))
                    }
                    Err(join_err) => {
                        warn!(%id, tool = %name, error = %join_err, "tool handler panicked");
                        ToolOutcome::Error(format!("tool handler panicked: {join_err}"))
                    }
                }
            }
        };

        self.notifier.notify(Notification::ToolActivity {
            id: id.clone(),
            name: name.clone(),
            success: outcome.is_success(),
        });
        Some(ToolCallResponse { id, name, outcome })
    }
}

fn handler_message(e: SessionError) -> String {
    match e {
        SessionError::ToolHandler(msg) => msg,
        other => other.to_string(),
    }
}
