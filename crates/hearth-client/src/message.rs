//! Chat message model.

use std::fmt;

use hearth_proto::payloads::chat::{WireBody, WireMessage};

/// Client-generated token correlating an optimistic message with its server
/// confirmation.
///
/// Unique within a session. Survives retries: a re-sent message keeps its
/// token so the server can de-duplicate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:016x}", self.0)
    }
}

/// Message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Stable server-issued identifier.
    Server(u64),
    /// Temporary identifier of an unconfirmed local message.
    Local(CorrelationId),
}

impl MessageId {
    /// Server identifier, if confirmed.
    pub fn server(self) -> Option<u64> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Whether this is a temporary local identifier.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(token) => write!(f, "local-{token}"),
        }
    }
}

/// Delivery progress of a message.
///
/// Ordered: `Pending < Sent < Delivered`. `Failed` sits outside the order
/// and is only reachable from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Created locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// Delivered to at least one other participant.
    Delivered,
    /// Rejected or timed out. Can be retried or discarded.
    Failed,
}

impl DeliveryState {
    /// Merge two observations of the same confirmed message. Never moves
    /// backwards.
    pub(crate) fn advance(self, other: Self) -> Self {
        match (self, other) {
            (Self::Delivered, _) | (_, Self::Delivered) => Self::Delivered,
            (Self::Sent, _) | (_, Self::Sent) => Self::Sent,
            (current, _) => current,
        }
    }
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageBody {
    /// Plain text.
    Text(String),
}

impl MessageBody {
    /// Text content, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
        }
    }

    pub(crate) fn to_wire(&self) -> WireBody {
        match self {
            Self::Text(text) => WireBody::Text { text: text.clone() },
        }
    }
}

impl From<WireBody> for MessageBody {
    fn from(body: WireBody) -> Self {
        match body {
            WireBody::Text { text } => Self::Text(text),
        }
    }
}

/// A message in the room timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server or temporary local identifier.
    pub id: MessageId,
    /// Owning room.
    pub room_id: String,
    /// Author.
    pub sender_id: String,
    /// Author display name.
    pub sender_name: Option<String>,
    /// Author avatar color.
    pub avatar_color: Option<String>,
    /// Content.
    pub body: MessageBody,
    /// Unix milliseconds. Authoritative once confirmed; a local wall-clock
    /// estimate while pending.
    pub created_at: u64,
    /// Delivery progress.
    pub delivery: DeliveryState,
    /// Client correlation token, for messages this client authored.
    pub correlation: Option<CorrelationId>,
}

impl ChatMessage {
    /// Build a confirmed message from its wire form.
    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: MessageId::Server(wire.id),
            room_id: wire.room_id,
            sender_id: wire.sender_id,
            sender_name: wire.sender_name,
            avatar_color: wire.avatar_color,
            body: wire.body.into(),
            created_at: wire.created_at_ms,
            delivery: DeliveryState::Sent,
            correlation: wire.correlation.map(CorrelationId),
        }
    }

    /// Server identifier, if confirmed.
    pub fn server_id(&self) -> Option<u64> {
        self.id.server()
    }

    /// Whether this message is an unconfirmed local copy.
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        self.body.as_text()
    }
}
