//! Fuzz target for the chat session under hostile server input
//!
//! # Strategy
//!
//! - Server frames: well-formed payloads with arbitrary ids, timestamps,
//!   correlation tokens and request ids, plus raw garbage frames
//! - Local operations: send, retry, discard, load older, typing
//! - Transport churn: opens, failures, closes
//! - Clock jumps between steps
//!
//! # Invariants
//!
//! - The session NEVER panics, whatever the server sends
//! - Timeline stays ordered with unique server ids
//! - Delivery state agrees with the id kind (local = pending/failed)
//! - Expired typists never show

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use bytes::Bytes;
use hearth_client::{ChatSession, CorrelationId, Environment, SessionConfig, SessionEvent, SessionIdentity};
use hearth_harness::{ClientSnapshot, InvariantRegistry, SimEnv, SystemSnapshot};
use hearth_proto::{
    ErrorPayload, Frame, FrameHeader, Opcode, Payload,
    payloads::{
        chat::{
            HistoryPage, Receipt, ReceiptKind, SendRejected, SyncResponse, TypingPush, WireBody,
            WireMessage,
        },
        session::HelloReply,
    },
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Step {
    Server { request_id: u8, payload: ServerPayload },
    Garbage { opcode: u16, bytes: Vec<u8> },
    Send { text: String },
    Retry { token: u64 },
    Discard { token: u64 },
    LoadOlder,
    StartTyping,
    StopTyping,
    TransportOpened,
    TransportFailed,
    TransportClosed,
    Advance { millis: u16 },
}

#[derive(Debug, Arbitrary)]
enum ServerPayload {
    HelloReply,
    Push(ArbMessage),
    Rejected { correlation: u64, code: u16 },
    Receipt { message_id: u64 },
    History { messages: Vec<ArbMessage>, has_more: bool },
    Sync { messages: Vec<ArbMessage>, complete: bool },
    Typing { user: u8, active: bool },
    Error { code: u16 },
    Ping,
}

#[derive(Debug, Arbitrary)]
struct ArbMessage {
    id: u8,
    sender: u8,
    created_at: u16,
    correlation: Option<u64>,
}

impl ArbMessage {
    fn into_wire(self) -> WireMessage {
        WireMessage {
            id: u64::from(self.id),
            room_id: "fuzz-room".to_string(),
            sender_id: format!("user-{}", self.sender % 4),
            sender_name: None,
            avatar_color: None,
            body: WireBody::Text { text: format!("message {}", self.id) },
            created_at_ms: u64::from(self.created_at),
            correlation: self.correlation,
        }
    }
}

impl ServerPayload {
    fn into_payload(self) -> Payload {
        let wire = |messages: Vec<ArbMessage>| messages.into_iter().map(ArbMessage::into_wire).collect();
        match self {
            Self::HelloReply => Payload::HelloReply(HelloReply { session_id: 1, server_time_ms: 0 }),
            Self::Push(message) => Payload::MessagePush(message.into_wire()),
            Self::Rejected { correlation, code } => Payload::SendRejected(SendRejected {
                correlation,
                code,
                reason: "rejected".to_string(),
            }),
            Self::Receipt { message_id } => {
                Payload::Receipt(Receipt { message_id, kind: ReceiptKind::Delivered })
            },
            Self::History { messages, has_more } => {
                Payload::HistoryPage(HistoryPage { messages: wire(messages), has_more })
            },
            Self::Sync { messages, complete } => {
                Payload::SyncResponse(SyncResponse { messages: wire(messages), complete })
            },
            Self::Typing { user, active } => Payload::TypingPush(TypingPush {
                user_id: format!("user-{}", user % 4),
                user_name: format!("User {}", user % 4),
                active,
            }),
            Self::Error { code } => {
                Payload::Error(ErrorPayload { code, message: "error".to_string(), retry_after: None })
            },
            Self::Ping => Payload::Ping,
        }
    }
}

fuzz_target!(|steps: Vec<Step>| {
    let env = SimEnv::with_seed(0);
    let identity = SessionIdentity {
        room_id: "fuzz-room".to_string(),
        user_id: "user-0".to_string(),
        display_name: "User 0".to_string(),
    };
    let mut session = ChatSession::new(env.clone(), SessionConfig::default(), identity, "token", true);
    let registry = InvariantRegistry::standard();
    let _ = session.start();

    for step in steps {
        let _ = match step {
            Step::Server { request_id, payload } => {
                let header = FrameHeader::with_request_id(Opcode::Ping, u32::from(request_id));
                match payload.into_payload().into_frame(header) {
                    Ok(frame) => session.handle(SessionEvent::FrameReceived(frame)),
                    Err(_) => continue,
                }
            },
            Step::Garbage { opcode, bytes } => {
                let opcode = Opcode::from_u16(opcode).unwrap_or(Opcode::MessagePush);
                let frame = Frame::new(FrameHeader::new(opcode), Bytes::from(bytes));
                session.handle(SessionEvent::FrameReceived(frame))
            },
            Step::Send { text } => session.send_message(&text).map(|(_, a)| a).unwrap_or_default(),
            Step::Retry { token } => session.retry_message(CorrelationId(token)),
            Step::Discard { token } => session.discard_message(CorrelationId(token)),
            Step::LoadOlder => session.load_older_messages(),
            Step::StartTyping => session.start_typing(),
            Step::StopTyping => session.stop_typing(),
            Step::TransportOpened => session.handle(SessionEvent::TransportOpened),
            Step::TransportFailed => {
                session.handle(SessionEvent::TransportFailed { reason: "fuzz".to_string() })
            },
            Step::TransportClosed => {
                session.handle(SessionEvent::TransportClosed { reason: "fuzz".to_string() })
            },
            Step::Advance { millis } => {
                env.advance(Duration::from_millis(u64::from(millis)));
                session.handle(SessionEvent::Tick { now: env.now() })
            },
        };

        let snapshot = SystemSnapshot::single(ClientSnapshot::from_session(0, &session, env.now()));
        registry.assert_all(&snapshot, "after fuzz step");
    }
});
