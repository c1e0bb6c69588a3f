//! Connection lifecycle state machine.
//!
//! Owns the transport lifecycle for one chat session: open, handshake,
//! heartbeats, timeouts and reconnection with backoff. Uses the action
//! pattern: methods take time as input and return [`ConnectionAction`]s for
//! the driver to execute. Timers are plain deadlines stored in the phase, so
//! dropping back to `Disconnected` cancels every pending retry.
//!
//! # State Machine
//!
//! ```text
//!               connect()                 transport_opened()
//! ┌──────────────┐     ┌─────────┐  Hello   ┌─────────────┐ HelloReply ┌───────────┐
//! │ Disconnected │────>│ Opening │─────────>│ Handshaking │───────────>│ Connected │
//! └──────────────┘     └─────────┘          └─────────────┘            └───────────┘
//!        ^                  ^  │ lost/timeout      │ lost/timeout            │ lost/idle
//!        │ disconnect()     │  ↓                   ↓                         ↓
//!        │                ┌──────────────────────────────────────────────────────┐
//!        └────────────────│                 Backoff (retry_at)                   │
//!                         └──────────────────────────────────────────────────────┘
//!
//!   Error(UNAUTHORIZED) from any open phase ──> Unauthorized (no automatic retry)
//! ```

use std::time::Duration;

use hearth_proto::{
    Frame, Opcode, Payload,
    payloads::session::{Goodbye, Hello},
};

use crate::{
    backoff::{Backoff, BackoffConfig},
    env::Environment,
    error::ConnectionError,
};

/// Protocol version sent in Hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Time allowed for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed to complete the Hello/HelloReply handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time without inbound traffic before the connection is considered
/// dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which Ping frames are sent while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no pending retry.
    Disconnected,
    /// First attempt in progress.
    Connecting,
    /// Connected and authenticated.
    Connected,
    /// Lost or failed; retrying with backoff.
    Reconnecting,
    /// Credentials rejected. Requires an explicit reconnect, usually with a
    /// fresh token.
    Unauthorized,
}

impl ConnectionState {
    /// Whether messages may be transmitted.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Session credentials presented in Hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Room the session is bound to.
    pub room_id: String,
    /// Stable user identifier.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Opaque bearer token.
    pub auth_token: String,
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Transport endpoint (e.g. `host:port`).
    pub endpoint: String,
    /// Credentials for the handshake.
    pub credentials: Credentials,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for the transport to open
    pub connect_timeout: Duration,
    /// Timeout for completing handshake
    pub handshake_timeout: Duration,
    /// Idle timeout before the link is considered dead
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < `idle_timeout` / 2)
    pub heartbeat_interval: Duration,
    /// Reconnect backoff
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport to this endpoint, then report
    /// `transport_opened` or `transport_lost`.
    Open {
        /// Transport endpoint
        endpoint: String,
    },

    /// Send this frame to the server
    SendFrame(Frame),

    /// Close the transport
    Close {
        /// Reason for closing the connection
        reason: String,
    },

    /// Handshake completed. The session should gap-fill and flush.
    Synchronize {
        /// Server-assigned session ID
        session_id: u64,
    },

    /// An established link went away. In-flight requests will not be
    /// answered.
    LinkLost,

    /// The observable state changed.
    StateChanged(ConnectionState),
}

#[derive(Debug, Clone)]
enum Phase<I> {
    Idle,
    Opening { since: I },
    Handshaking { since: I },
    Established { session_id: u64 },
    Backoff { retry_at: I },
    Unauthorized { reason: String },
}

/// Connection lifecycle state machine.
///
/// Pure state machine: no I/O. The environment is only used for backoff
/// jitter.
#[derive(Debug, Clone)]
pub struct ConnectionManager<E: Environment> {
    env: E,
    config: ConnectionConfig,
    target: Option<ConnectTarget>,
    phase: Phase<E::Instant>,
    backoff: Backoff,
    last_activity: Option<E::Instant>,
    last_heartbeat: Option<E::Instant>,
}

impl<E: Environment> ConnectionManager<E> {
    /// Create a manager in [`ConnectionState::Disconnected`].
    pub fn new(env: E, config: ConnectionConfig) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            env,
            config,
            target: None,
            phase: Phase::Idle,
            backoff,
            last_activity: None,
            last_heartbeat: None,
        }
    }

    /// Current observable state.
    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Opening { .. } | Phase::Handshaking { .. } => {
                if self.backoff.attempt() == 0 {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Reconnecting
                }
            },
            Phase::Established { .. } => ConnectionState::Connected,
            Phase::Backoff { .. } => ConnectionState::Reconnecting,
            Phase::Unauthorized { .. } => ConnectionState::Unauthorized,
        }
    }

    /// Session ID assigned by the server. `None` unless connected.
    pub fn session_id(&self) -> Option<u64> {
        match self.phase {
            Phase::Established { session_id } => Some(session_id),
            _ => None,
        }
    }

    /// Deadline of the next reconnect attempt. `None` unless backing off.
    pub fn retry_at(&self) -> Option<E::Instant> {
        match self.phase {
            Phase::Backoff { retry_at } => Some(retry_at),
            _ => None,
        }
    }

    /// Server's reason for rejecting the credentials. `None` unless
    /// [`ConnectionState::Unauthorized`].
    pub fn fatal_reason(&self) -> Option<&str> {
        match &self.phase {
            Phase::Unauthorized { reason } => Some(reason),
            _ => None,
        }
    }

    /// Failed attempts since the last successful handshake.
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Start connecting.
    ///
    /// No-op while a connection or retry is already in progress. Never fails:
    /// an unreachable endpoint surfaces later as
    /// [`ConnectionState::Reconnecting`].
    pub fn connect(&mut self, target: ConnectTarget, now: E::Instant) -> Vec<ConnectionAction> {
        self.target = Some(target);

        let mut actions = Vec::new();
        match self.phase {
            Phase::Idle | Phase::Unauthorized { .. } => {
                self.backoff.reset();
                self.open(now, &mut actions);
            },
            _ => tracing::debug!(state = ?self.state(), "connect ignored, already active"),
        }
        actions
    }

    /// Reconnect now, dropping any current transport and resetting backoff.
    ///
    /// `auth_token` replaces the stored token when present. This is the only
    /// way out of [`ConnectionState::Unauthorized`].
    pub fn reconnect(&mut self, auth_token: Option<String>, now: E::Instant) -> Vec<ConnectionAction> {
        let Some(target) = self.target.as_mut() else {
            tracing::debug!("reconnect ignored, never connected");
            return Vec::new();
        };
        if let Some(token) = auth_token {
            target.credentials.auth_token = token;
        }

        let mut actions = Vec::new();
        self.release(&mut actions, "reconnect requested");
        self.backoff.reset();
        self.open(now, &mut actions);
        actions
    }

    /// Close the transport and cancel any pending retry.
    pub fn disconnect(&mut self, reason: &str) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        self.release(&mut actions, reason);
        self.transition(Phase::Idle, &mut actions);
        actions
    }

    /// The transport requested by [`ConnectionAction::Open`] is up.
    pub fn transport_opened(&mut self, now: E::Instant) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if !matches!(self.phase, Phase::Opening { .. }) {
            tracing::debug!(state = ?self.state(), "stale transport_opened ignored");
            return actions;
        }
        let Some(target) = &self.target else {
            return actions;
        };

        let hello = Payload::Hello(Hello {
            version: PROTOCOL_VERSION,
            room_id: target.credentials.room_id.clone(),
            user_id: target.credentials.user_id.clone(),
            display_name: target.credentials.display_name.clone(),
            auth_token: target.credentials.auth_token.clone(),
        });

        match hello.to_frame() {
            Ok(frame) => {
                self.last_activity = Some(now);
                self.transition(Phase::Handshaking { since: now }, &mut actions);
                actions.push(ConnectionAction::SendFrame(frame));
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to encode Hello");
                self.fail(now, "hello encode failed", &mut actions);
            },
        }
        actions
    }

    /// The transport failed to open or was closed by the peer.
    pub fn transport_lost(&mut self, now: E::Instant, reason: &str) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.transport_open() {
            tracing::info!(%reason, "transport lost");
            self.fail(now, reason, &mut actions);
        } else {
            tracing::debug!(%reason, state = ?self.state(), "transport_lost ignored");
        }
        actions
    }

    /// Process a session-layer frame.
    ///
    /// Chat frames and non-fatal errors return no actions; the caller routes
    /// them elsewhere.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` for session opcodes that are
    ///   invalid in the current state
    /// - `ConnectionError::Protocol` if the payload cannot be decoded
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: E::Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let mut actions = Vec::new();
        if !self.transport_open() {
            return Ok(actions);
        }
        self.last_activity = Some(now);

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state(),
                opcode: frame.header.opcode(),
            });
        };

        match (&self.phase, opcode) {
            (Phase::Handshaking { .. }, Opcode::HelloReply) => {
                let Payload::HelloReply(reply) = Payload::from_frame(frame)? else {
                    return Err(self.unexpected(opcode));
                };
                self.backoff.reset();
                self.last_heartbeat = Some(now);
                self.transition(Phase::Established { session_id: reply.session_id }, &mut actions);
                tracing::info!(session_id = reply.session_id, "connected");
                actions.push(ConnectionAction::Synchronize { session_id: reply.session_id });
            },

            (_, Opcode::Error) => {
                let Payload::Error(error) = Payload::from_frame(frame)? else {
                    return Err(self.unexpected(opcode));
                };
                if error.is_fatal() {
                    tracing::warn!(code = error.code, message = %error.message, "credentials rejected");
                    self.release(&mut actions, "credentials rejected");
                    self.transition(Phase::Unauthorized { reason: error.message }, &mut actions);
                } else if matches!(self.phase, Phase::Handshaking { .. }) {
                    tracing::warn!(code = error.code, message = %error.message, "handshake refused");
                    self.fail(now, "handshake refused", &mut actions);
                }
            },

            (Phase::Established { .. }, Opcode::Ping) => {
                actions.push(ConnectionAction::SendFrame(Payload::Pong.to_frame()?));
            },

            (Phase::Established { .. }, Opcode::Pong) => {},

            (_, Opcode::Goodbye) => {
                let reason = match Payload::from_frame(frame)? {
                    Payload::Goodbye(Goodbye { reason }) => reason,
                    _ => String::from("goodbye"),
                };
                tracing::info!(%reason, "server said goodbye");
                self.fail(now, &reason, &mut actions);
            },

            (_, op) if op.is_session() => return Err(self.unexpected(op)),

            _ => {},
        }

        Ok(actions)
    }

    /// Process periodic maintenance: retries, timeouts and heartbeats.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        match self.phase {
            Phase::Backoff { retry_at } if now >= retry_at => {
                tracing::debug!(attempt = self.backoff.attempt(), "retrying connection");
                self.open(now, &mut actions);
            },
            Phase::Opening { since } if now - since >= self.config.connect_timeout => {
                self.fail(now, "connect timeout", &mut actions);
            },
            Phase::Handshaking { since } if now - since >= self.config.handshake_timeout => {
                self.fail(now, "handshake timeout", &mut actions);
            },
            Phase::Established { .. } => {
                let idle = self.last_activity.map(|last| now - last);
                if idle.is_some_and(|idle| idle > self.config.idle_timeout) {
                    self.fail(now, "idle timeout", &mut actions);
                    return actions;
                }

                let heartbeat_due = self
                    .last_heartbeat
                    .is_none_or(|last| now - last >= self.config.heartbeat_interval);
                if heartbeat_due {
                    match Payload::Ping.to_frame() {
                        Ok(frame) => actions.push(ConnectionAction::SendFrame(frame)),
                        Err(e) => tracing::error!(error = %e, "failed to encode Ping"),
                    }
                    self.last_heartbeat = Some(now);
                }
            },
            _ => {},
        }

        actions
    }

    fn transport_open(&self) -> bool {
        matches!(
            self.phase,
            Phase::Opening { .. } | Phase::Handshaking { .. } | Phase::Established { .. }
        )
    }

    fn unexpected(&self, opcode: Opcode) -> ConnectionError {
        ConnectionError::UnexpectedFrame { state: self.state(), opcode: opcode.to_u16() }
    }

    fn open(&mut self, now: E::Instant, actions: &mut Vec<ConnectionAction>) {
        let Some(target) = &self.target else {
            return;
        };
        let endpoint = target.endpoint.clone();
        self.last_activity = None;
        self.last_heartbeat = None;
        self.transition(Phase::Opening { since: now }, actions);
        actions.push(ConnectionAction::Open { endpoint });
    }

    /// Close the current transport, if any, without choosing the next phase.
    fn release(&mut self, actions: &mut Vec<ConnectionAction>, reason: &str) {
        if self.transport_open() {
            actions.push(ConnectionAction::Close { reason: reason.to_string() });
        }
        if matches!(self.phase, Phase::Established { .. }) {
            actions.push(ConnectionAction::LinkLost);
        }
    }

    fn fail(&mut self, now: E::Instant, reason: &str, actions: &mut Vec<ConnectionAction>) {
        self.release(actions, reason);

        let delay = self.backoff.next_delay(self.env.random_u64());
        tracing::info!(?delay, attempt = self.backoff.attempt(), %reason, "scheduling reconnect");
        self.transition(Phase::Backoff { retry_at: now + delay }, actions);
    }

    fn transition(&mut self, phase: Phase<E::Instant>, actions: &mut Vec<ConnectionAction>) {
        let before = self.state();
        self.phase = phase;
        let after = self.state();
        if before != after {
            tracing::debug!(?before, ?after, "connection state changed");
            actions.push(ConnectionAction::StateChanged(after));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{future::Future, time::Instant};

    use hearth_proto::{ErrorPayload, payloads::session::HelloReply};

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            1_700_000_000_000
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    fn target() -> ConnectTarget {
        ConnectTarget {
            endpoint: "127.0.0.1:4433".into(),
            credentials: Credentials {
                room_id: "group-chat".into(),
                user_id: "42".into(),
                display_name: "Ada".into(),
                auth_token: "token-1".into(),
            },
        }
    }

    fn hello_reply() -> Frame {
        Payload::HelloReply(HelloReply { session_id: 7, server_time_ms: 0 })
            .to_frame()
            .unwrap_or_else(|_| unreachable!())
    }

    fn error_frame(payload: ErrorPayload) -> Frame {
        Payload::Error(payload).to_frame().unwrap_or_else(|_| unreachable!())
    }

    fn connected(t0: Instant) -> ConnectionManager<TestEnv> {
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_opened(t0);
        let _ = conn.handle_frame(&hello_reply(), t0);
        conn
    }

    fn sent_opcodes(actions: &[ConnectionAction]) -> Vec<Opcode> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::SendFrame(f) => f.header.opcode_enum(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_opens_then_hello_then_synchronize() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());

        let actions = conn.connect(target(), t0);
        assert!(actions.contains(&ConnectionAction::Open { endpoint: "127.0.0.1:4433".into() }));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.transport_opened(t0);
        assert_eq!(sent_opcodes(&actions), vec![Opcode::Hello]);

        let actions = conn.handle_frame(&hello_reply(), t0).unwrap_or_default();
        assert!(actions.contains(&ConnectionAction::Synchronize { session_id: 7 }));
        assert!(actions.contains(&ConnectionAction::StateChanged(ConnectionState::Connected)));
        assert_eq!(conn.session_id(), Some(7));
    }

    #[test]
    fn unreachable_endpoint_backs_off_and_retries() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);

        let actions = conn.transport_lost(t0, "connection refused");
        assert!(actions.contains(&ConnectionAction::StateChanged(ConnectionState::Reconnecting)));
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::LinkLost)));

        // Zero jitter: first delay is half the 1s ceiling
        assert_eq!(conn.retry_at(), Some(t0 + Duration::from_millis(500)));
        assert!(conn.tick(t0 + Duration::from_millis(499)).is_empty());

        let actions = conn.tick(t0 + Duration::from_millis(500));
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Open { .. })));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn successful_handshake_resets_backoff() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_lost(t0, "refused");
        let _ = conn.tick(t0 + Duration::from_secs(1));
        let _ = conn.transport_lost(t0 + Duration::from_secs(1), "refused");
        assert_eq!(conn.attempt(), 2);

        let t1 = t0 + Duration::from_secs(5);
        let _ = conn.tick(t1);
        let _ = conn.transport_opened(t1);
        let _ = conn.handle_frame(&hello_reply(), t1);

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.attempt(), 0);
    }

    #[test]
    fn unauthorized_is_fatal_and_not_retried() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_opened(t0);

        let actions = conn
            .handle_frame(&error_frame(ErrorPayload::unauthorized("token expired")), t0)
            .unwrap_or_default();

        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Close { .. })));
        assert_eq!(conn.state(), ConnectionState::Unauthorized);
        assert_eq!(conn.fatal_reason(), Some("token expired"));

        // No retry no matter how long we wait
        assert!(conn.tick(t0 + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn reconnect_with_new_token_leaves_unauthorized() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_opened(t0);
        let _ = conn.handle_frame(&error_frame(ErrorPayload::unauthorized("expired")), t0);

        let actions = conn.reconnect(Some("token-2".into()), t0);
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Open { .. })));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.transport_opened(t0);
        let hello = actions.iter().find_map(|a| match a {
            ConnectionAction::SendFrame(f) => match Payload::from_frame(f) {
                Ok(Payload::Hello(hello)) => Some(hello),
                _ => None,
            },
            _ => None,
        });
        assert_eq!(hello.map(|h| h.auth_token), Some("token-2".to_string()));
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_lost(t0, "refused");
        assert!(conn.retry_at().is_some());

        let actions = conn.disconnect("disposed");
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::Close { .. })));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.retry_at().is_none());
        assert!(conn.tick(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn losing_established_link_reports_link_lost() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.transport_lost(t0, "reset by peer");
        assert!(actions.contains(&ConnectionAction::LinkLost));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn heartbeat_after_interval_and_pong_reply() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        assert!(conn.tick(t0 + Duration::from_secs(5)).is_empty());
        let actions = conn.tick(t0 + DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(sent_opcodes(&actions), vec![Opcode::Ping]);

        let ping = Payload::Ping.to_frame().unwrap_or_else(|_| unreachable!());
        let actions = conn.handle_frame(&ping, t0).unwrap_or_default();
        assert_eq!(sent_opcodes(&actions), vec![Opcode::Pong]);
    }

    #[test]
    fn idle_timeout_triggers_reconnect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.tick(t0 + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1));
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Close { .. })));
        assert!(actions.contains(&ConnectionAction::LinkLost));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn handshake_timeout_triggers_reconnect() {
        let t0 = Instant::now();
        let mut conn = ConnectionManager::new(TestEnv, ConnectionConfig::default());
        let _ = conn.connect(target(), t0);
        let _ = conn.transport_opened(t0);

        let actions = conn.tick(t0 + DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Close { .. })));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn hello_reply_outside_handshake_is_unexpected() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let result = conn.handle_frame(&hello_reply(), t0);
        assert!(matches!(result, Err(ConnectionError::UnexpectedFrame { .. })));
    }

    #[test]
    fn connect_while_active_is_noop() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        assert!(conn.connect(target(), t0).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }
}
