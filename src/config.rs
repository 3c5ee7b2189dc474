//! Configuration types for a live conversation session.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Microphone and speaker settings.
    pub audio: AudioConfig,
    /// Camera / screen frame capture.
    pub capture: CaptureConfig,
    /// Outbound multiplexer settings.
    pub outbound: OutboundConfig,
    /// Inbound demultiplexer and playback queue settings.
    pub inbound: InboundConfig,
    /// Remote endpoint settings.
    pub transport: TransportConfig,
    /// Built-in tool handlers.
    pub tools: ToolsConfig,
    /// Teardown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of microphone audio sent to the endpoint, in Hz.
    pub send_sample_rate: u32,
    /// Sample rate of audio received from the endpoint, in Hz.
    pub receive_sample_rate: u32,
    /// Channel count for both directions (1 = mono).
    pub channels: u16,
    /// Frames per microphone chunk.
    pub chunk_frames: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_sample_rate: 16_000,
            receive_sample_rate: 24_000,
            channels: 1,
            chunk_frames: 1024,
            input_device: None,
            output_device: None,
        }
    }
}

/// Which video source, if any, feeds frames into the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Audio only.
    #[default]
    None,
    /// Default camera.
    Camera,
    /// Primary display.
    Screen,
}

impl std::str::FromStr for CaptureMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "camera" => Ok(Self::Camera),
            "screen" => Ok(Self::Screen),
            other => Err(SessionError::Config(format!(
                "unknown capture mode '{other}' (expected none, camera or screen)"
            ))),
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Camera => "camera",
            Self::Screen => "screen",
        };
        f.write_str(name)
    }
}

/// Frame capture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Video source.
    pub mode: CaptureMode,
    /// Delay between frames in milliseconds.
    pub interval_ms: u64,
    /// Frames are downscaled to fit within this width and height.
    pub max_dimension: u32,
    /// JPEG quality, 1–100.
    pub jpeg_quality: u8,
    /// Camera index passed to the grabber (0 = default camera).
    pub camera_index: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::None,
            interval_ms: 1000,
            max_dimension: 1024,
            jpeg_quality: 80,
            camera_index: 0,
        }
    }
}

impl CaptureConfig {
    /// Pacing interval between frames.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Outbound multiplexer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Capacity of the shared outbound queue. Small on purpose: a full queue
    /// throttles capture sources.
    pub queue_capacity: usize,
    /// Text command that ends the session instead of being sent.
    pub quit_sentinel: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            quit_sentinel: "q".to_owned(),
        }
    }
}

/// Inbound demultiplexer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Maximum queued playback chunks before the oldest is evicted.
    pub playback_queue_cap: usize,
    /// Discard unplayed audio when the endpoint completes a turn.
    pub flush_on_turn_complete: bool,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            playback_queue_cap: 256,
            flush_on_turn_complete: true,
        }
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint URL (without the key query parameter).
    pub url: String,
    /// Model identifier sent in the setup message.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Response modalities requested from the endpoint.
    pub response_modalities: Vec<String>,
    /// System instruction sent in the setup message.
    pub system_instruction: String,
    /// How long to wait for the socket and the setup acknowledgement.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_owned(),
            model: "models/gemini-2.0-flash-exp".to_owned(),
            api_key_env: "GOOGLE_API_KEY".to_owned(),
            response_modalities: vec!["AUDIO".to_owned()],
            system_instruction: "Your name is IRCTC Train AI Agent. Here to help you with your tickets and Train details.".to_owned(),
            connect_timeout_ms: 15_000,
        }
    }
}

impl TransportConfig {
    /// Connect/setup timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Built-in tool handler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Ticket status lookup. Disabled when `endpoint` is `None`.
    pub ticket: TicketToolConfig,
}

/// Ticket status lookup tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketToolConfig {
    /// Tool name advertised to the endpoint.
    pub name: String,
    /// Lookup endpoint. `None` leaves the tool unregistered.
    pub endpoint: Option<String>,
    /// Value of the `Authorization` header sent with each lookup.
    pub authorization: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TicketToolConfig {
    fn default() -> Self {
        Self {
            name: "ticket_IRCTC_status".to_owned(),
            endpoint: None,
            authorization: None,
            timeout_ms: 10_000,
        }
    }
}

/// Teardown configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long draining tasks get before they are aborted.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 2000,
        }
    }
}

impl ShutdownConfig {
    /// Bound on the draining phase.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Returns the default config file path: `<config dir>/duplex-agent/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("duplex-agent-config"))
            .join("duplex-agent")
            .join("config.toml")
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, why: &str| Err(SessionError::Config(format!("{field} {why}")));

        if self.audio.send_sample_rate == 0 {
            return invalid("audio.send_sample_rate", "must be non-zero");
        }
        if self.audio.receive_sample_rate == 0 {
            return invalid("audio.receive_sample_rate", "must be non-zero");
        }
        if self.audio.channels == 0 {
            return invalid("audio.channels", "must be non-zero");
        }
        if self.audio.chunk_frames == 0 {
            return invalid("audio.chunk_frames", "must be non-zero");
        }
        if self.outbound.queue_capacity == 0 {
            return invalid("outbound.queue_capacity", "must be non-zero");
        }
        if self.outbound.quit_sentinel.trim().is_empty() {
            return invalid("outbound.quit_sentinel", "must not be empty");
        }
        if self.inbound.playback_queue_cap == 0 {
            return invalid("inbound.playback_queue_cap", "must be non-zero");
        }
        if self.capture.interval_ms == 0 {
            return invalid("capture.interval_ms", "must be non-zero");
        }
        if self.capture.max_dimension == 0 {
            return invalid("capture.max_dimension", "must be non-zero");
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return invalid("capture.jpeg_quality", "must be between 1 and 100");
        }
        if self.transport.model.trim().is_empty() {
            return invalid("transport.model", "must not be empty");
        }
        Ok(())
    }
}
