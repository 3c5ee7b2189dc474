//! Live-style JSON frames exchanged with the endpoint.
//!
//! Client frames are objects keyed by message kind (`setup`,
//! `realtimeInput`, `clientContent`, `toolResponse`). Server frames carry
//! at most one of `setupComplete`, `serverContent`, `toolCall`,
//! `toolCallCancellation`, `goAway`.

use crate::error::{Result, SessionError};
use crate::pipeline::messages::{InboundEvent, MediaChunk, OutboundMessage, ToolCallRequest};
use crate::tools::FunctionDeclaration;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// The first frame of every session.
#[derive(Debug, Clone, Serialize)]
pub struct SetupFrame {
    setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

impl SetupFrame {
    /// Build the setup frame.
    pub fn new(
        model: &str,
        response_modalities: &[String],
        system_instruction: &str,
        declarations: Vec<FunctionDeclaration>,
    ) -> Self {
        let system_instruction = if system_instruction.trim().is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![TextPart {
                    text: system_instruction.to_owned(),
                }],
            })
        };
        let tools = if declarations.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: declarations,
            }]
        };
        Self {
            setup: Setup {
                model: model.to_owned(),
                generation_config: GenerationConfig {
                    response_modalities: response_modalities.to_vec(),
                },
                system_instruction,
                tools,
            },
        }
    }
}

/// Encode one outbound message as a JSON frame.
pub fn encode_outbound(message: &OutboundMessage) -> serde_json::Value {
    match message {
        OutboundMessage::Realtime(chunk) => serde_json::json!({
            "realtimeInput": {
                "mediaChunks": [encode_blob(chunk)],
            }
        }),
        OutboundMessage::ClientText {
            text,
            turn_complete,
        } => serde_json::json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": turn_complete,
            }
        }),
        OutboundMessage::ToolResponse(response) => serde_json::json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": response.id,
                    "name": response.name,
                    "response": response.outcome.to_payload(),
                }]
            }
        }),
    }
}

fn encode_blob(chunk: &MediaChunk) -> serde_json::Value {
    serde_json::json!({
        "mimeType": chunk.mime_type(),
        "data": BASE64.encode(chunk.data()),
    })
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// A decoded server frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call: Option<ToolCallFrame>,
    #[serde(default)]
    tool_call_cancellation: Option<ToolCallCancellationFrame>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<Blob>,
    #[serde(default)]
    executable_code: Option<ExecutableCode>,
    #[serde(default)]
    code_execution_result: Option<CodeExecutionResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecutableCode {
    #[serde(default)]
    language: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CodeExecutionResult {
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    output: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    args: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToolCallCancellationFrame {
    #[serde(default)]
    ids: Vec<String>,
}

impl ServerFrame {
    /// Parse a frame from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] for malformed JSON.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| SessionError::Transport(format!("malformed server frame: {e}")))
    }

    /// Whether this frame acknowledges the setup message.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten the frame into sub-events, in wire order.
    ///
    /// Audio parts whose MIME type omits a rate are tagged with
    /// `default_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if an audio part is not valid base64.
    pub fn into_events(self, default_rate: u32) -> Result<Vec<InboundEvent>> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(InboundEvent::ServerEvent("setupComplete".into()));
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(InboundEvent::Interrupted);
            }
            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                part_events(part, default_rate, &mut events)?;
            }
            if content.turn_complete {
                events.push(InboundEvent::TurnComplete);
            }
        }

        if let Some(call) = self.tool_call {
            let requests: Vec<ToolCallRequest> = call
                .function_calls
                .into_iter()
                .map(|fc| ToolCallRequest {
                    id: fc.id,
                    name: fc.name,
                    arguments: fc.args.unwrap_or_default(),
                })
                .collect();
            if !requests.is_empty() {
                events.push(InboundEvent::ToolCall(requests));
            }
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(InboundEvent::ToolCallCancellation(cancellation.ids));
        }

        if let Some(go_away) = self.go_away {
            events.push(InboundEvent::ServerEvent(format!("goAway {go_away}")));
        }

        Ok(events)
    }
}

fn part_events(part: Part, default_rate: u32, events: &mut Vec<InboundEvent>) -> Result<()> {
    if let Some(blob) = part.inline_data {
        if blob.mime_type.starts_with("audio/") {
            let data = BASE64
                .decode(blob.data.as_bytes())
                .map_err(|e| SessionError::Transport(format!("invalid audio payload: {e}")))?;
            events.push(InboundEvent::Audio {
                data,
                sample_rate: parse_rate(&blob.mime_type).unwrap_or(default_rate),
            });
        } else {
            events.push(InboundEvent::ServerEvent(format!(
                "inline data ({})",
                blob.mime_type
            )));
        }
    }
    if let Some(text) = part.text
        && !text.is_empty()
    {
        events.push(InboundEvent::Text(text));
    }
    if let Some(code) = part.executable_code {
        events.push(InboundEvent::ExecutableCode {
            language: code.language,
            code: code.code,
        });
    }
    if let Some(result) = part.code_execution_result {
        events.push(InboundEvent::CodeExecutionResult {
            outcome: result.outcome,
            output: result.output,
        });
    }
    Ok(())
}

/// Extract `rate=N` from a MIME type such as `audio/pcm;rate=24000`.
fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
