//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads use CBOR for type safety and
//! forward compatibility. The payload type is determined by the header's
//! opcode, so only the inner struct is serialized (no variant tag).
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness).

pub mod chat;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session Management
    /// Initial handshake
    Hello(session::Hello),
    /// Server response to Hello
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Ping for keepalive
    Ping,
    /// Pong response
    Pong,
    /// Error response
    Error(ErrorPayload),

    // Chat
    /// Client sends a message
    SendMessage(chat::SendMessage),
    /// Server refused a message
    SendRejected(chat::SendRejected),
    /// Server pushes a confirmed message
    MessagePush(chat::WireMessage),
    /// Delivery receipt
    Receipt(chat::Receipt),
    /// History page request
    HistoryRequest(chat::HistoryRequest),
    /// History page response
    HistoryPage(chat::HistoryPage),
    /// Gap-fill request
    SyncRequest(chat::SyncRequest),
    /// Gap-fill response
    SyncResponse(chat::SyncResponse),
    /// Local typing state
    Typing(chat::Typing),
    /// Remote typing state
    TypingPush(chat::TypingPush),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Credentials rejected or expired. Fatal for the connection.
    pub const UNAUTHORIZED: u16 = 0x0001;
    /// Room does not exist or is not accessible.
    pub const ROOM_NOT_FOUND: u16 = 0x0002;
    /// History cursor no longer valid.
    pub const INVALID_CURSOR: u16 = 0x0003;
    /// Client is sending too fast.
    pub const RATE_LIMITED: u16 = 0x0004;
    /// Payload could not be decoded or failed validation.
    pub const INVALID_PAYLOAD: u16 = 0x0005;
    /// History truncated or unavailable.
    pub const HISTORY_UNAVAILABLE: u16 = 0x0006;

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHORIZED, message: msg.into(), retry_after: None }
    }

    /// Create an invalid cursor error.
    pub fn invalid_cursor(cursor: u64) -> Self {
        Self {
            code: Self::INVALID_CURSOR,
            message: format!("invalid history cursor: {cursor}"),
            retry_after: None,
        }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into(), retry_after: None }
    }

    /// Whether the error ends the current connection for good.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.code, Self::UNAUTHORIZED | Self::ROOM_NOT_FOUND)
    }

    /// Whether the error means "no more history" rather than a failure.
    #[must_use]
    pub fn is_history_exhausted(&self) -> bool {
        matches!(self.code, Self::INVALID_CURSOR | Self::HISTORY_UNAVAILABLE)
    }
}

fn to_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::Error(_) => Opcode::Error,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::SendRejected(_) => Opcode::SendRejected,
            Self::MessagePush(_) => Opcode::MessagePush,
            Self::Receipt(_) => Opcode::Receipt,
            Self::HistoryRequest(_) => Opcode::HistoryRequest,
            Self::HistoryPage(_) => Opcode::HistoryPage,
            Self::SyncRequest(_) => Opcode::SyncRequest,
            Self::SyncResponse(_) => Opcode::SyncResponse,
            Self::Typing(_) => Opcode::Typing,
            Self::TypingPush(_) => Opcode::TypingPush,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag. Size limits are
    /// enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Hello(inner) => to_cbor(inner, dst),
            Self::HelloReply(inner) => to_cbor(inner, dst),
            Self::Goodbye(inner) => to_cbor(inner, dst),
            Self::Ping | Self::Pong => Ok(()), // Zero-byte payloads
            Self::Error(inner) => to_cbor(inner, dst),
            Self::SendMessage(inner) => to_cbor(inner, dst),
            Self::SendRejected(inner) => to_cbor(inner, dst),
            Self::MessagePush(inner) => to_cbor(inner, dst),
            Self::Receipt(inner) => to_cbor(inner, dst),
            Self::HistoryRequest(inner) => to_cbor(inner, dst),
            Self::HistoryPage(inner) => to_cbor(inner, dst),
            Self::SyncRequest(inner) => to_cbor(inner, dst),
            Self::SyncResponse(inner) => to_cbor(inner, dst),
            Self::Typing(inner) => to_cbor(inner, dst),
            Self::TypingPush(inner) => to_cbor(inner, dst),
        }
    }

    /// Decode payload from bytes based on opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the limit
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(from_cbor(bytes)?),
            Opcode::HelloReply => Self::HelloReply(from_cbor(bytes)?),
            Opcode::Goodbye => Self::Goodbye(from_cbor(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::Error => Self::Error(from_cbor(bytes)?),
            Opcode::SendMessage => Self::SendMessage(from_cbor(bytes)?),
            Opcode::SendRejected => Self::SendRejected(from_cbor(bytes)?),
            Opcode::MessagePush => Self::MessagePush(from_cbor(bytes)?),
            Opcode::Receipt => Self::Receipt(from_cbor(bytes)?),
            Opcode::HistoryRequest => Self::HistoryRequest(from_cbor(bytes)?),
            Opcode::HistoryPage => Self::HistoryPage(from_cbor(bytes)?),
            Opcode::SyncRequest => Self::SyncRequest(from_cbor(bytes)?),
            Opcode::SyncResponse => Self::SyncResponse(from_cbor(bytes)?),
            Opcode::Typing => Self::Typing(from_cbor(bytes)?),
            Opcode::TypingPush => Self::TypingPush(from_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame.
    ///
    /// Encodes to CBOR, sets the header opcode and the payload size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Convert payload into a frame with a zero request id.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_frame(self) -> Result<Frame> {
        let header = FrameHeader::new(self.opcode());
        self.into_frame(header)
    }

    /// Parse payload from a transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - Decode errors from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
