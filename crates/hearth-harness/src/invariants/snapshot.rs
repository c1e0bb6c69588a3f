//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the system at a point in time.
//! Invariants operate on snapshots rather than live state so every check
//! sees one consistent moment.

use std::time::Duration;

use hearth_app::SessionView;
use hearth_client::{ChatSession, ConnectionState, DeliveryState, Environment};
use hearth_proto::payloads::chat::{WireBody, WireMessage};

/// Snapshot of the entire system: every client plus the server's log.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
    /// Server message log, if a server is part of the system.
    pub server: Vec<ServerMessage>,
}

impl SystemSnapshot {
    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client], server: Vec::new() }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients, server: Vec::new() }
    }

    /// Attach the server's message log.
    #[must_use]
    pub fn with_server(mut self, messages: &[WireMessage]) -> Self {
        self.server = messages.iter().map(ServerMessage::from).collect();
        self
    }
}

/// A message as the server stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Server id.
    pub id: u64,
    /// Author.
    pub sender_id: String,
    /// Text.
    pub text: String,
    /// Server timestamp.
    pub created_at: u64,
}

impl From<&WireMessage> for ServerMessage {
    fn from(message: &WireMessage) -> Self {
        let WireBody::Text { text } = &message.body;
        Self {
            id: message.id,
            sender_id: message.sender_id.clone(),
            text: text.clone(),
            created_at: message.created_at_ms,
        }
    }
}

/// A timeline entry as one client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Server id, `None` while local.
    pub server_id: Option<u64>,
    /// Correlation token.
    pub correlation: Option<u64>,
    /// Author.
    pub sender_id: String,
    /// Text.
    pub text: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Delivery progress.
    pub delivery: DeliveryState,
}

/// Snapshot of a single client's observable state.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Client identifier within the test.
    pub id: usize,
    /// Connection state.
    pub connection: ConnectionState,
    /// Timeline, in display order.
    pub messages: Vec<MessageSnapshot>,
    /// Remote typists and how long until each indicator lapses. `None` when
    /// captured from a view, which carries no deadlines.
    pub typing: Vec<(String, Option<Duration>)>,
    /// Messages awaiting confirmation.
    pub unconfirmed: usize,
    /// Whether the session has been disposed.
    pub disposed: bool,
}

impl ClientSnapshot {
    /// Capture a live session at `now`.
    pub fn from_session<E: Environment>(id: usize, session: &ChatSession<E>, now: E::Instant) -> Self {
        Self {
            id,
            connection: session.connection_state(),
            messages: session
                .messages()
                .map(|m| MessageSnapshot {
                    server_id: m.server_id(),
                    correlation: m.correlation.map(|c| c.0),
                    sender_id: m.sender_id.clone(),
                    text: m.text().unwrap_or_default().to_string(),
                    created_at: m.created_at,
                    delivery: m.delivery,
                })
                .collect(),
            typing: session
                .typing_users()
                .into_iter()
                .map(|u| (u.user_id.clone(), Some(u.expires_at - now)))
                .collect(),
            unconfirmed: session.unconfirmed_count(),
            disposed: session.is_disposed(),
        }
    }

    /// Capture a published view.
    pub fn from_view(id: usize, view: &SessionView) -> Self {
        Self {
            id,
            connection: view.connection,
            messages: view
                .messages
                .iter()
                .map(|m| MessageSnapshot {
                    server_id: m.id.server(),
                    correlation: m.correlation.map(|c| c.0),
                    sender_id: m.sender_id.clone(),
                    text: m.text.clone(),
                    created_at: m.created_at,
                    delivery: m.delivery,
                })
                .collect(),
            typing: view.typing.iter().map(|name| (name.clone(), None)).collect(),
            unconfirmed: view.unconfirmed,
            disposed: view.disposed,
        }
    }

    /// Confirmed server ids in display order.
    pub fn server_ids(&self) -> Vec<u64> {
        self.messages.iter().filter_map(|m| m.server_id).collect()
    }
}
