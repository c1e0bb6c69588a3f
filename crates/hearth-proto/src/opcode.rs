//! Frame operation codes.

/// Operation code identifying the payload type of a frame.
///
/// Session opcodes live in `0x00xx`, chat opcodes in `0x01xx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client handshake carrying credentials and room.
    Hello = 0x0001,
    /// Server accepts the handshake.
    HelloReply = 0x0002,
    /// Graceful disconnect.
    Goodbye = 0x0003,
    /// Keepalive request.
    Ping = 0x0004,
    /// Keepalive response.
    Pong = 0x0005,
    /// Error response.
    Error = 0x000F,

    /// Client sends a message.
    SendMessage = 0x0100,
    /// Server refused a message.
    SendRejected = 0x0101,
    /// Server pushes a confirmed message.
    MessagePush = 0x0102,
    /// Delivery receipt for a message.
    Receipt = 0x0103,

    /// Client requests a page of older history.
    HistoryRequest = 0x0110,
    /// Server answers a history request.
    HistoryPage = 0x0111,
    /// Client requests messages missed while disconnected.
    SyncRequest = 0x0112,
    /// Server answers a sync request.
    SyncResponse = 0x0113,

    /// Client typing start/stop.
    Typing = 0x0120,
    /// Server relays another user's typing state.
    TypingPush = 0x0121,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0001 => Self::Hello,
            0x0002 => Self::HelloReply,
            0x0003 => Self::Goodbye,
            0x0004 => Self::Ping,
            0x0005 => Self::Pong,
            0x000F => Self::Error,
            0x0100 => Self::SendMessage,
            0x0101 => Self::SendRejected,
            0x0102 => Self::MessagePush,
            0x0103 => Self::Receipt,
            0x0110 => Self::HistoryRequest,
            0x0111 => Self::HistoryPage,
            0x0112 => Self::SyncRequest,
            0x0113 => Self::SyncResponse,
            0x0120 => Self::Typing,
            0x0121 => Self::TypingPush,
            _ => return None,
        })
    }

    /// Session-layer opcodes are handled by the connection state machine.
    #[must_use]
    pub const fn is_session(self) -> bool {
        matches!(
            self,
            Self::Hello | Self::HelloReply | Self::Goodbye | Self::Ping | Self::Pong | Self::Error
        )
    }
}
