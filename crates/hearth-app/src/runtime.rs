//! Generic runtime for session orchestration.
//!
//! The Runtime owns a [`ChatSession`] and drives it from a single task,
//! coordinating between:
//! - [`ChatHandle`] commands from the UI
//! - [`Driver`] transport I/O
//! - A periodic tick for deadlines
//!
//! Every state change is serialized through this task, and a fresh
//! [`SessionView`] is published after each one.

use std::{collections::VecDeque, time::Duration};

use hearth_client::{ChatSession, SessionAction, SessionConfig, SessionEvent, SessionIdentity};
use hearth_core::env::Environment;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::MissedTickBehavior,
};

use crate::{
    driver::Driver,
    handle::{ChatHandle, Command},
    view::SessionView,
};

/// Interval between session ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Commands buffered between handles and the runtime task.
const COMMAND_CAPACITY: usize = 64;

/// Generic runtime that runs a [`ChatSession`] over a [`Driver`].
///
/// # Type Parameters
///
/// - `D`: Platform-specific transport driver
/// - `E`: Environment for time and randomness
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    env: E,
    session: ChatSession<E>,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<SessionView>,
    tick_interval: Duration,
    connect_timeout: Duration,
    /// Commands that arrived while a connect was in progress.
    deferred: VecDeque<Command>,
    dispose_waiters: Vec<oneshot::Sender<()>>,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime and the handle that controls it.
    ///
    /// Nothing happens until [`run`](Self::run) is awaited.
    pub fn new(
        driver: D,
        env: E,
        config: SessionConfig,
        identity: SessionIdentity,
        auth_token: impl Into<String>,
        enabled: bool,
    ) -> (Self, ChatHandle) {
        let connect_timeout = config.connection.connect_timeout;
        let session = ChatSession::new(env.clone(), config, identity, auth_token, enabled);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (view_tx, view_rx) = watch::channel(SessionView::capture(&session));

        let runtime = Self {
            driver,
            env,
            session,
            commands: command_rx,
            view: view_tx,
            tick_interval: DEFAULT_TICK_INTERVAL,
            connect_timeout,
            deferred: VecDeque::new(),
            dispose_waiters: Vec::new(),
        };
        (runtime, ChatHandle::new(command_tx, view_rx))
    }

    /// Override the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Run until disposed or until every handle is dropped.
    ///
    /// The transport is closed before this returns.
    pub async fn run(mut self) {
        let actions = self.session.start();
        self.execute(actions).await;
        self.publish();

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.session.is_disposed() {
            if let Some(command) = self.deferred.pop_front() {
                self.handle_command(command).await;
                self.publish();
                continue;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!("all handles dropped, disposing");
                        self.dispose();
                    },
                },
                frame = self.driver.recv_frame(), if self.driver.is_connected() => {
                    let event = match frame {
                        Some(frame) => SessionEvent::FrameReceived(frame),
                        None => SessionEvent::TransportClosed { reason: "transport closed".into() },
                    };
                    let actions = self.session.handle(event);
                    self.execute(actions).await;
                },
                _ = ticker.tick() => {
                    let now = self.env.now();
                    let actions = self.session.handle(SessionEvent::Tick { now });
                    self.execute(actions).await;
                },
            }

            self.publish();
        }

        self.driver.close();
        self.publish();
        for waiter in self.dispose_waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::debug!("runtime stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let actions = match command {
            Command::Send { text, reply } => match self.session.send_message(&text) {
                Ok((token, actions)) => {
                    let _ = reply.send(Ok(token));
                    actions
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                },
            },
            Command::Retry(token) => self.session.retry_message(token),
            Command::Discard(token) => self.session.discard_message(token),
            Command::LoadOlder => self.session.load_older_messages(),
            Command::StartTyping => self.session.start_typing(),
            Command::StopTyping => self.session.stop_typing(),
            Command::InputCleared => self.session.input_cleared(),
            Command::FocusLost => self.session.focus_lost(),
            Command::Reconnect { auth_token } => self.session.reconnect(auth_token),
            Command::Enable { auth_token } => self.session.enable(auth_token),
            Command::Dispose { done } => {
                self.dispose_waiters.push(done);
                self.dispose();
                return;
            },
        };
        self.execute(actions).await;
    }

    /// Execute session actions, feeding transport outcomes back in until
    /// the session is quiet.
    async fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::OpenTransport { endpoint } => {
                    // Observers see Connecting while the connect is pending.
                    self.publish();
                    let Some(event) = self.open(&endpoint).await else {
                        self.dispose();
                        return;
                    };
                    queue.extend(self.session.handle(event));
                },
                SessionAction::Send(frame) => {
                    if let Err(e) = self.driver.send_frame(frame).await {
                        tracing::warn!(error = %e, "send failed");
                        let reason = e.to_string();
                        queue.extend(self.session.handle(SessionEvent::TransportClosed { reason }));
                    }
                },
                SessionAction::CloseTransport { reason } => {
                    tracing::debug!(%reason, "closing transport");
                    self.driver.close();
                },
                SessionAction::Notify(change) => tracing::trace!(?change, "session changed"),
            }
        }
    }

    /// Open the transport. Returns `None` if disposal was requested while
    /// connecting; the connect attempt is abandoned.
    async fn open(&mut self, endpoint: &str) -> Option<SessionEvent<E::Instant>> {
        tracing::debug!(%endpoint, "opening transport");
        let connect = tokio::time::timeout(self.connect_timeout, self.driver.connect(endpoint));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return Some(match result {
                        Ok(Ok(())) => SessionEvent::TransportOpened,
                        Ok(Err(e)) => SessionEvent::TransportFailed { reason: e.to_string() },
                        Err(_) => SessionEvent::TransportFailed { reason: "connect timed out".into() },
                    });
                },
                command = self.commands.recv() => match command {
                    Some(Command::Dispose { done }) => {
                        self.dispose_waiters.push(done);
                        return None;
                    },
                    Some(other) => self.deferred.push_back(other),
                    None => return None,
                },
            }
        }
    }

    fn dispose(&mut self) {
        for action in self.session.dispose() {
            if let SessionAction::CloseTransport { reason } = action {
                tracing::debug!(%reason, "closing transport");
            }
        }
        self.driver.close();
    }

    fn publish(&self) {
        let next = SessionView::capture(&self.session);
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
