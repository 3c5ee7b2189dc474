//! Session orchestrator that connects, wires all stages together and tears
//! them down.
//!
//! ```text
//!  capture ──┐
//!  mic ──────┼─► outbound queue ─► drain ─► transport ─► demux ─┬─► playback queue ─► speaker
//!  commands ─┘                                                   ├─► notifications
//!                                                                └─► tool dispatcher ─► transport
//! ```

use super::channel::bounded;
use super::inbound::InboundDemultiplexer;
use super::messages::OutboundItem;
use super::outbound::{CommandRelay, DrainExit, OutboundDrain};
use crate::audio::{
    AudioInputDevice, AudioInputSource, AudioOutputDevice, AudioOutputSink, PlaybackQueue,
};
use crate::bridge::{Notification, Notifier, SessionBridge, SessionOutcome};
use crate::capture::{CaptureSource, FrameDevice, FrameEncoder};
use crate::config::{CaptureMode, SessionConfig};
use crate::devices::DeviceProvider;
use crate::error::{Result, SessionError};
use crate::tools::{ToolCallDispatcher, ToolRegistry};
use crate::transport::{SessionConnector, SessionHandle};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Lifecycle of one session.
///
/// `Connecting → Active → Draining → Closed`, or `Errored` from
/// `Connecting` or `Active`. A fatal error gets the same teardown as
/// `Draining` without publishing it. `Closed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the transport and devices.
    Connecting,
    /// All stages running.
    Active,
    /// Stages are stopping.
    Draining,
    /// Ended normally.
    Closed,
    /// Ended by a fatal error.
    Errored,
}

impl SessionState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// The concurrent stages of an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Outbound,
    Commands,
    Microphone,
    Speaker,
    Capture,
    Inbound,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Outbound => "outbound",
            Self::Commands => "commands",
            Self::Microphone => "microphone",
            Self::Speaker => "speaker",
            Self::Capture => "capture",
            Self::Inbound => "inbound",
        };
        f.write_str(name)
    }
}

/// What a finished stage means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskExit {
    /// The stage is done; the rest keep running.
    Done,
    /// The session should end normally.
    EndSession,
}

type TaskResult = (Role, Result<TaskExit>);

/// What `Connecting` has opened so far.
#[derive(Default)]
struct Opened {
    transport: Option<SessionHandle>,
    input: Option<Arc<dyn AudioInputDevice>>,
    output: Option<Arc<dyn AudioOutputDevice>>,
}

impl Opened {
    async fn close(&self) {
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        if let Some(input) = &self.input {
            input.close().await;
        }
        if let Some(output) = &self.output {
            output.close().await;
        }
    }
}

/// Everything opened during `Connecting`.
struct Resources {
    transport: SessionHandle,
    input: Arc<dyn AudioInputDevice>,
    output: Arc<dyn AudioOutputDevice>,
    capture: Option<Arc<dyn FrameDevice>>,
}

impl Resources {
    async fn close(&self) {
        self.transport.close().await;
        self.input.close().await;
        self.output.close().await;
        if let Some(capture) = &self.capture {
            capture.close().await;
        }
    }
}

/// Runs one live session from connect to teardown.
pub struct SessionOrchestrator {
    config: SessionConfig,
    connector: Arc<dyn SessionConnector>,
    devices: Arc<dyn DeviceProvider>,
    registry: Arc<ToolRegistry>,
    commands: Option<mpsc::Receiver<String>>,
    notifier: Notifier,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

impl SessionOrchestrator {
    /// Create an orchestrator. Nothing is opened until [`run`](Self::run).
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn SessionConnector>,
        devices: Arc<dyn DeviceProvider>,
        registry: ToolRegistry,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            config,
            connector,
            devices,
            registry: Arc::new(registry),
            commands: None,
            notifier: Notifier::disabled(),
            cancel: CancellationToken::new(),
            state_tx,
        }
    }

    /// Attach the UI bridge: commands feed the outbound queue and
    /// notifications report text, tool activity and state.
    pub fn with_bridge(mut self, bridge: SessionBridge) -> Self {
        self.commands = Some(bridge.commands);
        self.notifier = bridge.notifier;
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Request shutdown. The session drains and ends `Closed`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(())` when it ends `Closed` (quit sentinel, UI gone or
    /// external cancellation).
    ///
    /// # Errors
    ///
    /// Returns the fatal error that moved the session to `Errored`.
    pub async fn run(mut self) -> Result<()> {
        let span = info_span!("session", id = %uuid::Uuid::new_v4());
        async move {
            let result = self.run_inner().await;
            let outcome = match &result {
                Ok(()) => {
                    self.set_state(SessionState::Closed);
                    info!("session closed");
                    SessionOutcome::Completed
                }
                Err(e) => {
                    self.set_state(SessionState::Errored);
                    error!(error = %e, "session failed");
                    SessionOutcome::Failed {
                        cause: e.to_string(),
                    }
                }
            };
            self.notifier.notify(Notification::SessionEnded(outcome));
            result
        }
        .instrument(span)
        .await
    }

    fn set_state(&self, state: SessionState) {
        debug!(?state, "session state");
        self.state_tx.send_replace(state);
        self.notifier.notify(Notification::State(state));
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.set_state(SessionState::Connecting);
        let Some(resources) = self.open().await? else {
            info!("cancelled while connecting");
            return Ok(());
        };

        self.set_state(SessionState::Active);
        let mut tasks = self.spawn_stages(&resources);
        let verdict = self.supervise(&mut tasks).await;

        // A fatal error tears down the same way but reports only `Errored`.
        if verdict.is_ok() {
            self.set_state(SessionState::Draining);
        }
        self.cancel.cancel();
        self.drain(&mut tasks).await;
        resources.close().await;
        verdict
    }

    /// Connect, then open devices. Returns `None` if the session is cancelled
    /// first. Anything opened is closed again if a later step fails or is
    /// cancelled.
    async fn open(&self) -> Result<Option<Resources>> {
        let mut opened = Opened::default();

        let Some(transport) = self.step(&opened, self.connector.connect()).await? else {
            return Ok(None);
        };
        info!("transport connected");
        opened.transport = Some(Arc::clone(&transport));

        let audio = &self.config.audio;
        let open_input =
            self.devices
                .open_input(audio.send_sample_rate, audio.channels, audio.chunk_frames);
        let Some(input) = self.step(&opened, open_input).await? else {
            return Ok(None);
        };
        opened.input = Some(Arc::clone(&input));

        let open_output = self
            .devices
            .open_output(audio.receive_sample_rate, audio.channels);
        let Some(output) = self.step(&opened, open_output).await? else {
            return Ok(None);
        };
        opened.output = Some(Arc::clone(&output));

        let capture = match self.config.capture.mode {
            CaptureMode::None => None,
            mode => {
                let Some(capture) = self.step(&opened, self.devices.open_capture(mode)).await?
                else {
                    return Ok(None);
                };
                capture
            }
        };
        info!(capture = %self.config.capture.mode, "devices opened");

        Ok(Some(Resources {
            transport,
            input,
            output,
            capture,
        }))
    }

    /// Run one opening step unless cancelled. On failure or cancellation
    /// everything in `opened` is closed.
    async fn step<T>(
        &self,
        opened: &Opened,
        step: impl Future<Output = Result<T>>,
    ) -> Result<Option<T>> {
        match self.cancel.run_until_cancelled(step).await {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => {
                opened.close().await;
                Err(e)
            }
            None => {
                opened.close().await;
                Ok(None)
            }
        }
    }

    fn spawn_stages(&mut self, resources: &Resources) -> JoinSet<TaskResult> {
        let config = &self.config;
        let cancel = &self.cancel;
        let mut tasks = JoinSet::new();

        let (queue_tx, queue_rx) = bounded::<OutboundItem>(config.outbound.queue_capacity);
        let playback = PlaybackQueue::new(config.inbound.playback_queue_cap);

        let drain = OutboundDrain::new(
            queue_rx,
            Arc::clone(&resources.transport),
            config.outbound.quit_sentinel.clone(),
        );
        let token = cancel.clone();
        tasks.spawn(async move {
            let exit = drain.run(token).await.map(|exit| match exit {
                DrainExit::Quit | DrainExit::Exhausted => TaskExit::EndSession,
                DrainExit::Cancelled => TaskExit::Done,
            });
            (Role::Outbound, exit)
        });

        if let Some(commands) = self.commands.take() {
            let relay = CommandRelay::new(
                commands,
                queue_tx.clone(),
                playback.clone(),
                config.outbound.quit_sentinel.clone(),
            );
            let token = cancel.clone();
            tasks.spawn(async move {
                (Role::Commands, relay.run(token).await.map(|()| TaskExit::Done))
            });
        }

        let mic = AudioInputSource::new(
            Arc::clone(&resources.input),
            config.audio.send_sample_rate,
            queue_tx.clone(),
        );
        let token = cancel.clone();
        tasks.spawn(async move { (Role::Microphone, mic.run(token).await.map(|()| TaskExit::Done)) });

        let speaker = AudioOutputSink::new(Arc::clone(&resources.output), playback.clone());
        let token = cancel.clone();
        tasks.spawn(async move {
            (Role::Speaker, speaker.run(token).await.map(|()| TaskExit::Done))
        });

        if let Some(device) = &resources.capture {
            let capture = CaptureSource::new(
                Arc::clone(device),
                FrameEncoder::new(config.capture.max_dimension, config.capture.jpeg_quality),
                config.capture.interval(),
                queue_tx.clone(),
            );
            let token = cancel.clone();
            tasks.spawn(async move {
                (Role::Capture, capture.run(token).await.map(|()| TaskExit::Done))
            });
        }

        // Producers hold their own clones; the queue closes when they finish.
        drop(queue_tx);

        let dispatcher = ToolCallDispatcher::new(Arc::clone(&self.registry), self.notifier.clone());
        let demux = InboundDemultiplexer::new(
            Arc::clone(&resources.transport),
            playback,
            dispatcher,
            self.notifier.clone(),
        )
        .with_flush_on_turn_complete(config.inbound.flush_on_turn_complete);
        let token = cancel.clone();
        tasks.spawn(async move { (Role::Inbound, demux.run(token).await.map(|()| TaskExit::Done)) });

        info!(stages = tasks.len(), "session active");
        tasks
    }

    /// Wait until the session should end. `Ok` for a normal end, `Err` for
    /// the first fatal error.
    async fn supervise(&self, tasks: &mut JoinSet<TaskResult>) -> Result<()> {
        loop {
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next() => joined,
                () = self.cancel.cancelled() => {
                    info!("session cancelled");
                    return Ok(());
                }
            };
            match joined {
                None => return Ok(()),
                Some(Ok((role, Ok(TaskExit::EndSession)))) => {
                    info!(%role, "stage ended the session");
                    return Ok(());
                }
                Some(Ok((role, Ok(TaskExit::Done)))) => debug!(%role, "stage finished"),
                Some(Ok((role, Err(e)))) if e.is_cancelled() => debug!(%role, "stage cancelled"),
                Some(Ok((role, Err(e)))) if e.is_fatal() => {
                    error!(%role, error = %e, "fatal stage error");
                    return Err(e);
                }
                Some(Ok((role, Err(e)))) => warn!(%role, error = %e, "stage error contained"),
                Some(Err(join_err)) => {
                    error!(error = %join_err, "stage task failed");
                    return Err(SessionError::Channel(format!("session task failed: {join_err}")));
                }
            }
        }
    }

    /// Give stages the drain timeout to observe cancellation, then abort
    /// whatever is left.
    async fn drain(&self, tasks: &mut JoinSet<TaskResult>) {
        let timeout = self.config.shutdown.drain_timeout();
        let finished = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((role, Ok(_))) => debug!(%role, "stage stopped"),
                    Ok((role, Err(e))) => debug!(%role, error = %e, "stage stopped with error"),
                    Err(e) => warn!(error = %e, "stage task failed while draining"),
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_ms = timeout.as_millis() as u64,
                "drain timed out, aborting stages"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}
