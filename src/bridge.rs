//! Plain-text bridge between the session and its user interface.
//!
//! Two one-directional channels: text commands flow into the session
//! (including the quit sentinel) and notifications flow out. The session side
//! never blocks on the UI: notifications go through an unbounded channel and
//! a vanished UI is ignored.
//!
//! [`run_stdio_bridge`] wires the channels to stdin/stdout. Stdout carries
//! only notifications; tracing must go to stderr.

use crate::pipeline::coordinator::SessionState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Default capacity of the command channel.
pub const COMMAND_CAPACITY: usize = 32;

/// How a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Quit sentinel or external cancellation.
    Completed,
    /// A fatal error ended the session.
    Failed {
        /// Human-readable cause.
        cause: String,
    },
}

/// Something the UI should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Text produced by the agent.
    AgentText(String),
    /// The session changed state.
    State(SessionState),
    /// A tool call was answered.
    ToolActivity {
        /// Request id.
        id: String,
        /// Tool name.
        name: String,
        /// Whether the handler produced a result.
        success: bool,
    },
    /// Final notification of every session.
    SessionEnded(SessionOutcome),
}

/// Session-side notification sender. Sends never block and never fail.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Deliver a notification if anyone is listening.
    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx
            && tx.send(notification).is_err()
        {
            tracing::trace!("notification dropped; UI receiver is gone");
        }
    }
}

/// UI-side endpoints.
#[derive(Debug)]
pub struct UiBridge {
    /// Send text commands to the session.
    pub commands: mpsc::Sender<String>,
    /// Receive notifications from the session.
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

/// Session-side endpoints.
#[derive(Debug)]
pub struct SessionBridge {
    /// Text commands from the UI.
    pub commands: mpsc::Receiver<String>,
    /// Notifications to the UI.
    pub notifier: Notifier,
}

/// Create a connected bridge pair.
pub fn ui_bridge(command_capacity: usize) -> (UiBridge, SessionBridge) {
    let (cmd_tx, cmd_rx) = mpsc::channel(command_capacity.max(1));
    let (note_tx, note_rx) = mpsc::unbounded_channel();
    (
        UiBridge {
            commands: cmd_tx,
            notifications: note_rx,
        },
        SessionBridge {
            commands: cmd_rx,
            notifier: Notifier::new(note_tx),
        },
    )
}

/// Text line shown for a notification, if it is user-visible.
pub fn render(notification: &Notification) -> Option<String> {
    match notification {
        Notification::AgentText(text) => Some(format!("Agent: {text}")),
        Notification::ToolActivity { name, success, .. } => Some(if *success {
            format!("[tool {name} answered]")
        } else {
            format!("[tool {name} failed]")
        }),
        Notification::SessionEnded(SessionOutcome::Completed) => Some("Session ended.".into()),
        Notification::SessionEnded(SessionOutcome::Failed { cause }) => {
            Some(format!("Session failed: {cause}"))
        }
        Notification::State(_) => None,
    }
}

/// Forward each line of `reader` as a command until EOF or the session stops
/// listening. Dropping `commands` on return tells the session the UI is gone.
pub async fn forward_lines<R>(reader: R, commands: mpsc::Sender<String>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if commands.send(line).await.is_err() {
            tracing::debug!("session stopped accepting commands");
            break;
        }
    }
    Ok(())
}

/// Write rendered notifications to `out` until the session ends.
///
/// Returns the session outcome, or `None` if the sender vanished without a
/// `SessionEnded` notification.
pub async fn write_notifications<W>(
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    mut out: W,
) -> std::io::Result<Option<SessionOutcome>>
where
    W: AsyncWrite + Unpin,
{
    while let Some(notification) = notifications.recv().await {
        if let Notification::State(state) = &notification {
            tracing::debug!(?state, "session state");
        }
        if let Some(line) = render(&notification) {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        if let Notification::SessionEnded(outcome) = notification {
            return Ok(Some(outcome));
        }
    }
    Ok(None)
}

/// Run the bridge over stdin/stdout until the session ends.
///
/// The stdin reader is detached: a blocked terminal read must not hold up the
/// exit once the session has ended.
pub async fn run_stdio_bridge(ui: UiBridge) -> std::io::Result<Option<SessionOutcome>> {
    let UiBridge {
        commands,
        mut notifications,
    } = ui;

    let reader = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = forward_lines(stdin, commands).await {
            tracing::warn!(error = %e, "failed to read from stdin");
        }
        tracing::info!("stdin closed");
    });

    let outcome = write_notifications(&mut notifications, tokio::io::stdout()).await;
    reader.abort();
    outcome
}
