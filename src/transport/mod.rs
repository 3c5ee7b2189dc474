//! Contract between the session core and the remote endpoint.
//!
//! The core only needs three primitives on an open session: send one
//! outbound message, receive the next inbound sub-event, and close. Turns
//! are delimited by [`InboundEvent::TurnComplete`](crate::pipeline::messages::InboundEvent::TurnComplete),
//! so `receive` is a lazy sequence that is finite per turn and simply keeps
//! going for the next one.

pub mod live;
pub mod protocol;

use crate::error::Result;
use crate::pipeline::messages::{InboundEvent, OutboundMessage, StreamRead};
use async_trait::async_trait;
use std::sync::Arc;

/// An open duplex connection to the endpoint.
///
/// `send` is called concurrently from the outbound drain task and the inbound
/// demultiplexer (tool responses); implementations must serialize writes
/// internally. `receive` is only ever called from one task.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`](crate::SessionError::Transport) if
    /// the message cannot be written or the session is closed.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Next inbound sub-event. `EndOfStream` means the endpoint closed the
    /// session.
    async fn receive(&self) -> StreamRead<InboundEvent>;

    /// Close the session. In-flight and later sends fail.
    async fn close(&self);
}

/// Handle to one open session, shared by the tasks that send and receive.
pub type SessionHandle = Arc<dyn SessionTransport>;

/// Opens sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect and complete whatever handshake the endpoint requires.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`](crate::SessionError::Transport) on
    /// connect or handshake failure.
    async fn connect(&self) -> Result<SessionHandle>;
}
