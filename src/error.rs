//! Error types for the live session.

/// Top-level error type for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Capture or audio device unavailable or failed mid-stream.
    #[error("device error: {0}")]
    Device(String),

    /// Connect, send, or receive failure on the session transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A registered tool handler failed.
    #[error("tool handler error: {0}")]
    ToolHandler(String),

    /// The endpoint asked for a tool nobody registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The session was cancelled. Not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Frame or payload encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Internal channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SessionError {
    /// Whether this error must tear the whole session down.
    ///
    /// Tool failures are answered in-band, and cancellation is a normal
    /// control signal; everything else that reaches the orchestrator ends
    /// the session in the errored state.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Device(_) | Self::Transport(_) | Self::Channel(_) => true,
            Self::ToolHandler(_) | Self::UnknownTool(_) | Self::Cancelled => false,
            Self::Config(_) | Self::Encode(_) | Self::Io(_) => true,
        }
    }

    /// Whether this is the cancellation control signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
