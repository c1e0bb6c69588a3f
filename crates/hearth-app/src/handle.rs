//! Cloneable command handle for a running session.

use hearth_client::{CorrelationId, SendError};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{error::RuntimeError, view::SessionView};

/// Operations forwarded to the runtime task.
#[derive(Debug)]
pub(crate) enum Command {
    Send { text: String, reply: oneshot::Sender<Result<CorrelationId, SendError>> },
    Retry(CorrelationId),
    Discard(CorrelationId),
    LoadOlder,
    StartTyping,
    StopTyping,
    InputCleared,
    FocusLost,
    Reconnect { auth_token: Option<String> },
    Enable { auth_token: Option<String> },
    Dispose { done: oneshot::Sender<()> },
}

/// Handle to a session running on a [`Runtime`](crate::Runtime).
///
/// Cheap to clone. Every operation is applied in order on the runtime task.
/// State is observed through [`subscribe`](Self::subscribe).
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
}

impl ChatHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, view: watch::Receiver<SessionView>) -> Self {
        Self { commands, view }
    }

    /// Subscribe to view updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Send a text message. Returns its correlation token once queued.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Send` if the message is empty or too long
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn send_message(&self, text: impl Into<String>) -> Result<CorrelationId, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { text: text.into(), reply }).await?;
        let queued = rx.await.map_err(|_| RuntimeError::Stopped)?;
        queued.map_err(RuntimeError::from)
    }

    /// Re-send a failed message.
    pub async fn retry_message(&self, token: CorrelationId) -> Result<(), RuntimeError> {
        self.command(Command::Retry(token)).await
    }

    /// Remove a failed message.
    pub async fn discard_message(&self, token: CorrelationId) -> Result<(), RuntimeError> {
        self.command(Command::Discard(token)).await
    }

    /// Fetch the previous page of history.
    pub async fn load_older_messages(&self) -> Result<(), RuntimeError> {
        self.command(Command::LoadOlder).await
    }

    /// Local keystroke.
    pub async fn start_typing(&self) -> Result<(), RuntimeError> {
        self.command(Command::StartTyping).await
    }

    /// Local typing ended.
    pub async fn stop_typing(&self) -> Result<(), RuntimeError> {
        self.command(Command::StopTyping).await
    }

    /// The input field was cleared.
    pub async fn input_cleared(&self) -> Result<(), RuntimeError> {
        self.command(Command::InputCleared).await
    }

    /// The input field lost focus.
    pub async fn focus_lost(&self) -> Result<(), RuntimeError> {
        self.command(Command::FocusLost).await
    }

    /// Reconnect now, optionally with a fresh token.
    pub async fn reconnect(&self, auth_token: Option<String>) -> Result<(), RuntimeError> {
        self.command(Command::Reconnect { auth_token }).await
    }

    /// Enable a session created disabled.
    pub async fn enable(&self, auth_token: Option<String>) -> Result<(), RuntimeError> {
        self.command(Command::Enable { auth_token }).await
    }

    /// Dispose the session and wait for the runtime to close the transport.
    ///
    /// Idempotent: disposing a stopped runtime succeeds immediately.
    pub async fn dispose(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Dispose { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).await.map_err(|_| RuntimeError::Stopped)
    }
}
