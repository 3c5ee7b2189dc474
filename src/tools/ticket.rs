//! Ticket (PNR) status lookup over HTTP.

use super::ToolHandler;
use crate::config::TicketToolConfig;
use crate::error::{Result, SessionError};
use std::time::Duration;
use tracing::{debug, info};

/// Looks up a ticket by PNR against a configured JSON endpoint.
///
/// The request body is `{"ticket": "<pnr>"}`; the response body is returned
/// to the endpoint as-is.
pub struct TicketStatusTool {
    name: String,
    endpoint: String,
    authorization: Option<String>,
    agent: ureq::Agent,
}

impl TicketStatusTool {
    /// Build the tool from config. Returns `None` when no endpoint is set.
    pub fn from_config(config: &TicketToolConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_ref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Some(Self {
            name: config.name.clone(),
            endpoint: endpoint.to_owned(),
            authorization: config.authorization.clone(),
            agent,
        })
    }

    fn lookup(&self, pnr: &str) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "ticket": pnr }).to_string();
        let mut request = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json");
        if let Some(auth) = &self.authorization {
            request = request.set("Authorization", auth);
        }

        let response = request.send_string(&body).map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                SessionError::ToolHandler(format!("ticket lookup returned HTTP {code}"))
            }
            ureq::Error::Transport(t) => {
                SessionError::ToolHandler(format!("ticket lookup failed: {t}"))
            }
        })?;

        let text = response
            .into_string()
            .map_err(|e| SessionError::ToolHandler(format!("reading ticket response: {e}")))?;
        debug!(bytes = text.len(), "ticket lookup response");
        serde_json::from_str(&text)
            .map_err(|e| SessionError::ToolHandler(format!("ticket response is not JSON: {e}")))
    }
}

impl ToolHandler for TicketStatusTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Retrieve ticket status for a given ticket_pnr. You can also tell various details about the ticket"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_pnr": {
                    "type": "string",
                    "description": "The ticket PNR to check status for."
                }
            },
            "required": ["ticket_pnr"]
        })
    }

    fn call(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let pnr = match arguments.get("ticket_pnr") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SessionError::ToolHandler(
                    "missing required argument ticket_pnr".into(),
                ));
            }
        };
        info!(tool = %self.name, %pnr, "looking up ticket status");
        self.lookup(&pnr)
    }
}
