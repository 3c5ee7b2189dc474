//! WebSocket transport for a Live-style bidirectional endpoint.

use super::protocol::{ServerFrame, SetupFrame, encode_outbound};
use super::{SessionConnector, SessionHandle, SessionTransport};
use crate::config::TransportConfig;
use crate::error::{Result, SessionError};
use crate::pipeline::messages::{InboundEvent, OutboundMessage, StreamRead};
use crate::tools::FunctionDeclaration;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Live sessions over WebSocket.
#[derive(Clone)]
pub struct LiveConnector {
    config: TransportConfig,
    api_key: String,
    receive_sample_rate: u32,
    declarations: Vec<FunctionDeclaration>,
}

impl std::fmt::Debug for LiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnector")
            .field("url", &self.config.url)
            .field("model", &self.config.model)
            .field("tools", &self.declarations.len())
            .finish_non_exhaustive()
    }
}

impl LiveConnector {
    /// Build a connector, reading the API key from the environment variable
    /// named by `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the variable is unset or empty.
    pub fn from_env(
        config: TransportConfig,
        receive_sample_rate: u32,
        declarations: Vec<FunctionDeclaration>,
    ) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SessionError::Config(format!("{} is not set", config.api_key_env))
            })?;
        Ok(Self::with_api_key(
            config,
            api_key,
            receive_sample_rate,
            declarations,
        ))
    }

    /// Build a connector with an explicit API key.
    pub fn with_api_key(
        config: TransportConfig,
        api_key: impl Into<String>,
        receive_sample_rate: u32,
        declarations: Vec<FunctionDeclaration>,
    ) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            receive_sample_rate,
            declarations,
        }
    }

    fn endpoint_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.config.url)
            .map_err(|e| SessionError::Config(format!("invalid transport.url: {e}")))?;
        if !self.api_key.is_empty() {
            url.query_pairs_mut().append_pair("key", &self.api_key);
        }
        Ok(url)
    }

    async fn handshake(&self) -> Result<LiveTransport> {
        let url = self.endpoint_url()?;
        debug!(host = url.host_str().unwrap_or_default(), "connecting to live endpoint");

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let setup = SetupFrame::new(
            &self.config.model,
            &self.config.response_modalities,
            &self.config.system_instruction,
            self.declarations.clone(),
        );
        let json = serde_json::to_string(&setup)
            .map_err(|e| SessionError::Encode(format!("setup frame: {e}")))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Transport(format!("setup send failed: {e}")))?;

        loop {
            let raw = match stream.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => bytes,
                Some(Ok(Message::Close(frame))) => {
                    return Err(SessionError::Transport(format!(
                        "endpoint closed during setup: {frame:?}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(SessionError::Transport(format!("setup read failed: {e}")));
                }
                None => {
                    return Err(SessionError::Transport(
                        "endpoint closed during setup".into(),
                    ));
                }
            };
            let frame = ServerFrame::parse(&raw)?;
            if frame.is_setup_complete() {
                break;
            }
            trace!("ignoring pre-setup frame");
        }

        info!(model = %self.config.model, "live session established");
        Ok(LiveTransport {
            sink: Mutex::new(sink),
            reader: Mutex::new(Reader {
                stream,
                pending: VecDeque::new(),
            }),
            receive_sample_rate: self.receive_sample_rate,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SessionConnector for LiveConnector {
    async fn connect(&self) -> Result<SessionHandle> {
        let timeout: Duration = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(Ok(transport)) => Ok(Arc::new(transport)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Transport(format!(
                "no setup acknowledgement within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

struct Reader {
    stream: SplitStream<WsStream>,
    pending: VecDeque<InboundEvent>,
}

/// One open Live session.
pub struct LiveTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Reader>,
    receive_sample_rate: u32,
    closed: AtomicBool,
}

#[async_trait]
impl SessionTransport for LiveTransport {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Transport("session closed".into()));
        }
        let json = serde_json::to_string(&encode_outbound(&message))
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Transport(format!("send failed: {e}")))
    }

    async fn receive(&self) -> StreamRead<InboundEvent> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(event) = reader.pending.pop_front() {
                return StreamRead::Item(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return StreamRead::EndOfStream;
            }
            let raw = match reader.stream.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => bytes,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "endpoint closed the session");
                    return StreamRead::EndOfStream;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return StreamRead::Failed(format!("receive failed: {e}")),
                None => return StreamRead::EndOfStream,
            };
            let events = match ServerFrame::parse(&raw)
                .and_then(|frame| frame.into_events(self.receive_sample_rate))
            {
                Ok(events) => events,
                Err(e) => return StreamRead::Failed(e.to_string()),
            };
            reader.pending.extend(events);
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            warn!("closing live session: {e}");
        }
    }
}
