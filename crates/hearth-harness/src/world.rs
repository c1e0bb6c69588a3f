//! Synchronous simulated world: sessions wired directly to a model server.
//!
//! `SimWorld` executes [`SessionAction`]s itself instead of going through the
//! async runtime, so scenarios and property tests can interleave operations,
//! network faults and clock jumps at exact points.

use std::time::Duration;

use hearth_client::{
    ChatSession, CorrelationId, Environment, SendError, SessionAction, SessionChange, SessionConfig,
    SessionEvent, SessionIdentity,
};

use crate::{
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_env::SimEnv,
    sim_server::{ConnId, SimServer},
};

/// Room every world hosts.
pub const WORLD_ROOM: &str = "room-1";

/// Token the world's server accepts.
pub const WORLD_TOKEN: &str = "valid-token";

/// Index of a client in the world.
pub type ClientId = usize;

/// Bound on pump iterations. A correct session always goes quiet well
/// before this; hitting it means two parties are ping-ponging.
const MAX_PUMP_ROUNDS: usize = 10_000;

/// One session and its link to the server.
pub struct SimClient {
    /// The session under test.
    pub session: ChatSession<SimEnv>,
    conn: Option<ConnId>,
    /// Every notification the session emitted, oldest first.
    pub changes: Vec<SessionChange>,
}

impl SimClient {
    /// Server connection, if open.
    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }
}

/// Server, shared clock and a set of clients.
pub struct SimWorld {
    /// Shared environment.
    pub env: SimEnv,
    /// Model server.
    pub server: SimServer,
    clients: Vec<SimClient>,
    config: SessionConfig,
}

impl SimWorld {
    /// Create a world with a seeded environment and default session config.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, SessionConfig::default())
    }

    /// Create a world with a custom session config.
    pub fn with_config(seed: u64, config: SessionConfig) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            server: SimServer::new(WORLD_ROOM, WORLD_TOKEN),
            clients: Vec::new(),
            config,
        }
    }

    /// Add a client. It is not started.
    pub fn add_client(&mut self, user_id: &str, display_name: &str, enabled: bool) -> ClientId {
        self.add_client_with_token(user_id, display_name, WORLD_TOKEN, enabled)
    }

    /// Add a client that presents `token`.
    pub fn add_client_with_token(
        &mut self,
        user_id: &str,
        display_name: &str,
        token: &str,
        enabled: bool,
    ) -> ClientId {
        let identity = SessionIdentity {
            room_id: WORLD_ROOM.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        };
        let session = ChatSession::new(self.env.clone(), self.config.clone(), identity, token, enabled);
        self.clients.push(SimClient { session, conn: None, changes: Vec::new() });
        self.clients.len() - 1
    }

    /// Access a client.
    pub fn client(&self, id: ClientId) -> &SimClient {
        &self.clients[id]
    }

    /// Access a client's session.
    pub fn session(&self, id: ClientId) -> &ChatSession<SimEnv> {
        &self.clients[id].session
    }

    /// Start a client and let the world settle.
    pub fn start(&mut self, id: ClientId) {
        let actions = self.clients[id].session.start();
        self.execute(id, actions);
        self.settle();
    }

    /// Send a message and let the world settle.
    pub fn send(&mut self, id: ClientId, text: &str) -> Result<CorrelationId, SendError> {
        let (token, actions) = self.clients[id].session.send_message(text)?;
        self.execute(id, actions);
        self.settle();
        Ok(token)
    }

    /// Apply any session operation, then settle.
    pub fn apply(&mut self, id: ClientId, op: impl FnOnce(&mut ChatSession<SimEnv>) -> Vec<SessionAction>) {
        let actions = op(&mut self.clients[id].session);
        self.execute(id, actions);
        self.settle();
    }

    /// Apply an operation without delivering any replies yet.
    pub fn apply_quiet(&mut self, id: ClientId, op: impl FnOnce(&mut ChatSession<SimEnv>) -> Vec<SessionAction>) {
        let actions = op(&mut self.clients[id].session);
        self.execute(id, actions);
    }

    /// Advance the shared clock, tick every client, and settle.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        let now = self.env.now();
        for id in 0..self.clients.len() {
            let actions = self.clients[id].session.handle(SessionEvent::Tick { now });
            self.execute(id, actions);
        }
        self.settle();
    }

    /// Advance in `step` increments until `total` has elapsed.
    pub fn advance_by_steps(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let by = step.min(total - elapsed);
            self.advance(by);
            elapsed += by;
        }
    }

    /// Server drops a client's connection; the client notices immediately.
    pub fn kill_link(&mut self, id: ClientId) {
        let Some(conn) = self.clients[id].conn.take() else {
            return;
        };
        self.server.kill_connection(conn);
        let event = SessionEvent::TransportClosed { reason: "connection reset".into() };
        let actions = self.clients[id].session.handle(event);
        self.execute(id, actions);
        self.settle();
    }

    /// Lose every frame currently queued for a client.
    pub fn drop_inbound(&mut self, id: ClientId) -> usize {
        self.clients[id].conn.map_or(0, |conn| self.server.drop_outgoing(conn))
    }

    /// Deliver queued server frames until nothing moves.
    pub fn settle(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            if !self.pump_once() {
                return;
            }
        }
        tracing::warn!("world did not settle");
    }

    /// Deliver at most one frame to each client. Returns whether anything
    /// was delivered.
    pub fn pump_once(&mut self) -> bool {
        let mut moved = false;
        for id in 0..self.clients.len() {
            let Some(conn) = self.clients[id].conn else { continue };
            if let Some(frame) = self.server.take_outgoing(conn) {
                moved = true;
                let actions = self.clients[id].session.handle(SessionEvent::FrameReceived(frame));
                self.execute(id, actions);
            }
        }
        moved
    }

    /// Snapshot every client plus the server log.
    pub fn snapshot(&self) -> SystemSnapshot {
        let now = self.env.now();
        let clients = self
            .clients
            .iter()
            .enumerate()
            .map(|(id, c)| ClientSnapshot::from_session(id, &c.session, now))
            .collect();
        SystemSnapshot::from_clients(clients).with_server(self.server.messages())
    }

    /// Assert every invariant in `registry`.
    pub fn assert_invariants(&self, registry: &InvariantRegistry, context: &str) {
        registry.assert_all(&self.snapshot(), context);
    }

    /// Run a client's actions against the server.
    fn execute(&mut self, id: ClientId, actions: Vec<SessionAction>) {
        let mut queue: std::collections::VecDeque<_> = actions.into();

        while let Some(action) = queue.pop_front() {
            let client = &mut self.clients[id];
            match action {
                SessionAction::OpenTransport { .. } => {
                    if let Some(old) = client.conn.take() {
                        self.server.close_connection(old);
                    }
                    let event = match self.server.open_connection() {
                        Some(conn) => {
                            client.conn = Some(conn);
                            SessionEvent::TransportOpened
                        },
                        None => SessionEvent::TransportFailed { reason: "connection refused".into() },
                    };
                    queue.extend(client.session.handle(event));
                },
                SessionAction::Send(frame) => match client.conn {
                    Some(conn) if self.server.is_alive(conn) => self.server.receive(conn, &frame),
                    _ => {
                        client.conn = None;
                        let event = SessionEvent::TransportClosed { reason: "not connected".into() };
                        queue.extend(client.session.handle(event));
                    },
                },
                SessionAction::CloseTransport { .. } => {
                    if let Some(conn) = client.conn.take() {
                        self.server.close_connection(conn);
                    }
                },
                SessionAction::Notify(change) => client.changes.push(change),
            }
        }
    }
}
