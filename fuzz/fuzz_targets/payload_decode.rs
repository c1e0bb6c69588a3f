//! Fuzz target for Payload::from_frame
//!
//! Feeds the same arbitrary bytes to every opcode, covering malformed CBOR,
//! payloads that belong to a different opcode, and oversized strings.
//!
//! The decoder should NEVER panic. All invalid inputs return an error.

#![no_main]

use bytes::Bytes;
use hearth_proto::{Frame, FrameHeader, Opcode, Payload};
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 16] = [
    Opcode::Hello,
    Opcode::HelloReply,
    Opcode::Goodbye,
    Opcode::Ping,
    Opcode::Pong,
    Opcode::Error,
    Opcode::SendMessage,
    Opcode::SendRejected,
    Opcode::MessagePush,
    Opcode::Receipt,
    Opcode::HistoryRequest,
    Opcode::HistoryPage,
    Opcode::SyncRequest,
    Opcode::SyncResponse,
    Opcode::Typing,
    Opcode::TypingPush,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let frame = Frame::new(FrameHeader::with_request_id(opcode, 1), Bytes::copy_from_slice(data));
        let _ = Payload::from_frame(&frame);
    }
});
