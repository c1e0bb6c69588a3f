//! Chat payloads: messages, history, gap-fill and typing.

use serde::{Deserialize, Serialize};

/// Message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBody {
    /// Plain text.
    Text {
        /// UTF-8 text.
        text: String,
    },
}

/// A server-confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-issued identifier, unique within the room and increasing with
    /// arrival order at the server.
    pub id: u64,
    /// Owning room.
    pub room_id: String,
    /// Author.
    pub sender_id: String,
    /// Author display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Author avatar color (e.g. `#5B8DEF`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_color: Option<String>,
    /// Content.
    pub body: WireBody,
    /// Server timestamp, Unix milliseconds.
    pub created_at_ms: u64,
    /// Correlation token supplied by the author's client, echoed back so the
    /// author can reconcile its optimistic copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<u64>,
}

/// Client sends a message.
///
/// The server treats this idempotently per `(sender, correlation)`: a
/// re-sent message is confirmed again rather than duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Client correlation token.
    pub correlation: u64,
    /// Content.
    pub body: WireBody,
    /// Client wall clock at send, Unix milliseconds.
    pub client_time_ms: u64,
}

/// Server refused a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRejected {
    /// Correlation token of the refused message.
    pub correlation: u64,
    /// Error code (see [`ErrorPayload`](crate::ErrorPayload)).
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// Kind of receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// Delivered to at least one other participant.
    Delivered,
}

/// Delivery receipt for a confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Server identifier of the message.
    pub message_id: u64,
    /// Receipt kind.
    pub kind: ReceiptKind,
}

/// Request a page of history.
///
/// `before: None` requests the newest page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Exclusive upper bound (server id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<u64>,
    /// Maximum number of messages.
    pub limit: u32,
}

/// A page of history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Messages in the page.
    pub messages: Vec<WireMessage>,
    /// Whether older messages remain.
    pub has_more: bool,
}

/// Request messages newer than a known server id (gap-fill).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Exclusive lower bound (server id).
    pub after: u64,
    /// Maximum number of messages.
    pub limit: u32,
}

/// Messages missed while disconnected, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Missed messages.
    pub messages: Vec<WireMessage>,
    /// `false` if more missed messages remain beyond `limit`.
    pub complete: bool,
}

/// Local typing state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typing {
    /// `true` for start, `false` for stop.
    pub active: bool,
}

/// Another participant's typing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPush {
    /// Typist.
    pub user_id: String,
    /// Typist display name.
    pub user_name: String,
    /// `true` for start, `false` for stop.
    pub active: bool,
}
