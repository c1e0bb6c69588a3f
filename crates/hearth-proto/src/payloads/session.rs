//! Session management payloads.

use serde::{Deserialize, Serialize};

/// Client handshake.
///
/// Sent immediately after the transport opens. The server answers with
/// [`HelloReply`] or an `Error` frame carrying
/// [`ErrorPayload::UNAUTHORIZED`](crate::ErrorPayload::UNAUTHORIZED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks.
    pub version: u8,
    /// Room the session is bound to.
    pub room_id: String,
    /// Stable user identifier.
    pub user_id: String,
    /// Display name shown to other participants.
    pub display_name: String,
    /// Opaque bearer token.
    pub auth_token: String,
}

/// Server accepts the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Server-assigned session identifier.
    pub session_id: u64,
    /// Server wall clock at handshake, Unix milliseconds.
    pub server_time_ms: u64,
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason.
    pub reason: String,
}
