//! Message types passed between session stages.

use std::fmt;

/// Outcome of one read from a device or the transport.
///
/// End of stream is an ordinary outcome, not an error: a camera that runs
/// out of frames ends its loop normally.
#[derive(Debug)]
pub enum StreamRead<T> {
    /// The next item.
    Item(T),
    /// The source has no more items.
    EndOfStream,
    /// The read failed; the string is a human-readable cause.
    Failed(String),
}

/// A unit of captured media, immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaChunk {
    /// 16-bit little-endian PCM.
    Audio {
        /// Raw PCM bytes.
        data: Vec<u8>,
        /// Sample rate in Hz.
        sample_rate: u32,
    },
    /// An encoded still image.
    Image {
        /// Encoded image bytes.
        data: Vec<u8>,
        /// MIME type, e.g. `image/jpeg`.
        mime_type: String,
    },
}

impl MediaChunk {
    /// MIME type as sent on the wire.
    pub fn mime_type(&self) -> String {
        match self {
            Self::Audio { sample_rate, .. } => format!("audio/pcm;rate={sample_rate}"),
            Self::Image { mime_type, .. } => mime_type.clone(),
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Audio { data, .. } | Self::Image { data, .. } => data,
        }
    }

    /// Whether this is an image chunk.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

// Payloads are large; keep logs readable.
impl fmt::Debug for MediaChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio { data, sample_rate } => f
                .debug_struct("Audio")
                .field("bytes", &data.len())
                .field("sample_rate", sample_rate)
                .finish(),
            Self::Image { data, mime_type } => f
                .debug_struct("Image")
                .field("bytes", &data.len())
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

/// An item on the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundItem {
    /// Captured media from a capture or microphone source.
    Media(MediaChunk),
    /// A typed command from the UI bridge.
    Text(String),
}

/// A message handed to the transport for sending.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Streaming media input.
    Realtime(MediaChunk),
    /// A user text turn.
    ClientText {
        /// The typed text.
        text: String,
        /// Whether this text completes the user's turn.
        turn_complete: bool,
    },
    /// The answer to a tool call.
    ToolResponse(ToolCallResponse),
}

/// A tool invocation requested by the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque correlation token; the response must carry it back.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Named arguments.
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Structured result.
    Result(serde_json::Value),
    /// Error message; serialized as `{"error": message}`.
    Error(String),
}

impl ToolOutcome {
    /// The generic acknowledgement sent for tools nobody registered.
    pub fn acknowledged() -> Self {
        Self::Result(serde_json::json!({ "result": "ok" }))
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Payload to put on the wire. Non-object results are wrapped so the
    /// payload is always a JSON object.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::Result(v @ serde_json::Value::Object(_)) => v.clone(),
            Self::Result(v) => serde_json::json!({ "result": v }),
            Self::Error(msg) => serde_json::json!({ "error": msg }),
        }
    }
}

/// The answer to exactly one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    /// Id of the originating request.
    pub id: String,
    /// Name of the originating request.
    pub name: String,
    /// Result or error payload.
    pub outcome: ToolOutcome,
}

/// One sub-event of an inbound turn.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Decoded PCM audio to play.
    Audio {
        /// 16-bit little-endian PCM.
        data: Vec<u8>,
        /// Sample rate in Hz.
        sample_rate: u32,
    },
    /// Displayable text.
    Text(String),
    /// Code the endpoint generated and ran.
    ExecutableCode {
        /// Language tag, e.g. `PYTHON`.
        language: String,
        /// Source code.
        code: String,
    },
    /// Output of endpoint-side code execution.
    CodeExecutionResult {
        /// Outcome tag, e.g. `OUTCOME_OK`.
        outcome: String,
        /// Captured output.
        output: String,
    },
    /// One or more tool calls that must be answered.
    ToolCall(Vec<ToolCallRequest>),
    /// The endpoint withdrew earlier tool calls.
    ToolCallCancellation(Vec<String>),
    /// The endpoint detected a user interruption.
    Interrupted,
    /// End of the current turn.
    TurnComplete,
    /// Anything else the endpoint sent, summarized for diagnostics.
    ServerEvent(String),
}
