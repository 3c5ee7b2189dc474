//! Duplex agent: a live, bidirectional multimodal conversation session.
//!
//! One session streams microphone audio, optional camera or screen frames and
//! typed commands to a remote endpoint, and plays back or displays what the
//! endpoint sends in return:
//! Microphone / Camera / Keyboard → outbound queue → endpoint → Speaker / Text / Tools
//!
//! # Architecture
//!
//! The session is built from independent stages connected by queues:
//! - **Capture**: Grabs camera or screen frames and encodes them as JPEG
//! - **Audio input**: Records 16 kHz PCM from the microphone via `cpal`
//! - **Outbound**: One bounded FIFO queue drained in order to the transport
//! - **Transport**: Live-style WebSocket session with the endpoint
//! - **Inbound**: Routes audio to playback, text to the UI, tool calls to handlers
//! - **Audio output**: Plays 24 kHz PCM via `cpal`, flushed on barge-in
//!
//! [`SessionOrchestrator`] connects, runs the stages and tears them down.

pub mod audio;
pub mod bridge;
pub mod capture;
pub mod config;
pub mod devices;
pub mod error;
pub mod pipeline;
pub mod tools;
pub mod transport;

pub use bridge::{Notification, SessionOutcome, UiBridge, ui_bridge};
pub use config::{CaptureMode, SessionConfig};
pub use devices::{DeviceProvider, SystemDevices};
pub use error::{Result, SessionError};
pub use pipeline::coordinator::{SessionOrchestrator, SessionState};
pub use tools::{ToolHandler, ToolRegistry};
pub use transport::live::LiveConnector;
pub use transport::{SessionConnector, SessionTransport};
