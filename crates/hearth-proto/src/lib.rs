//! Hearth wire protocol.
//!
//! Every message on the wire is a [`Frame`]: a fixed 16-byte binary header
//! followed by a CBOR-encoded [`Payload`]. The header carries the opcode and a
//! request id so the client can route and correlate frames without decoding
//! the payload.
//!
//! The protocol is deliberately small. Session frames (`Hello`, `Ping`, ...)
//! drive the connection state machine; chat frames (`SendMessage`,
//! `MessagePush`, `HistoryPage`, ...) drive the message store, outbound queue
//! and typing tracker.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::ProtocolError;
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};
