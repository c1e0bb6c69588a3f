//! Fuzz target for hostile chat payloads
//!
//! # Strategy
//!
//! - History pages and gap-fill responses whose `messages` array claims far
//!   more entries than the frame carries
//! - Message bodies nested deeper than any real `WireBody`
//! - Ids, cursors and limits at the edges of their integer range
//! - Message text around the body limit and the 1 MiB frame limit
//!
//! # Invariants
//!
//! - Claimed lengths never cause allocation beyond the frame size
//! - Deep nesting is rejected, not followed until the stack runs out
//! - Any well-formed payload decodes back to exactly what was encoded
//! - A frame encodes iff its payload fits in 1 MiB
//! - The outbound queue refuses text iff it exceeds `max_body_bytes`

#![no_main]

use std::time::Instant;

use arbitrary::Arbitrary;
use hearth_client::{OutboundConfig, OutboundQueue, SendError};
use hearth_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::chat::{
        HistoryPage, HistoryRequest, SendMessage, SyncRequest, SyncResponse, WireBody, WireMessage,
    },
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Attack {
    /// `messages` declares `2^exponent` entries but carries `present`.
    OversizedMessageArray { exponent: u8, present: u8, sync: bool },
    /// `body` wrapped in `depth` single-entry maps.
    NestedBody { depth: u16 },
    /// Integer fields pushed to their limits.
    ExtremeValues { id: u64, cursor: u64, limit: u32, created_at: u64, correlation: Option<u64> },
    /// Text of `len` bytes, around the body and frame limits.
    LongText { len: u32 },
}

/// CBOR item head for `major` type with argument `value`.
fn head(major: u8, value: u64, out: &mut Vec<u8>) {
    let major = major << 5;
    match value {
        0..=23 => out.push(major | value as u8),
        24..=0xFF => out.extend([major | 24, value as u8]),
        0x100..=0xFFFF => {
            out.push(major | 25);
            out.extend((value as u16).to_be_bytes());
        },
        0x1_0000..=0xFFFF_FFFF => {
            out.push(major | 26);
            out.extend((value as u32).to_be_bytes());
        },
        _ => {
            out.push(major | 27);
            out.extend(value.to_be_bytes());
        },
    }
}

fn text(s: &str, out: &mut Vec<u8>) {
    head(3, s.len() as u64, out);
    out.extend(s.as_bytes());
}

fn wire_message(id: u64) -> WireMessage {
    WireMessage {
        id,
        room_id: "room".to_string(),
        sender_id: "alice".to_string(),
        sender_name: None,
        avatar_color: None,
        body: WireBody::Text { text: "hi".to_string() },
        created_at_ms: id,
        correlation: None,
    }
}

fn encoded(payload: &Payload) -> Vec<u8> {
    let mut buf = Vec::new();
    payload.encode(&mut buf).expect("payload must encode");
    buf
}

fn assert_round_trip(payload: Payload) {
    let frame = payload.clone().to_frame().expect("payload must encode");
    let decoded = Payload::from_frame(&frame).expect("encoded payload must decode");
    assert_eq!(decoded, payload);
}

fuzz_target!(|attack: Attack| {
    match attack {
        Attack::OversizedMessageArray { exponent, present, sync } => {
            let claimed = 1u64 << (exponent % 64);
            let present = u64::from(present % 8).min(claimed);
            let element = encoded(&Payload::MessagePush(wire_message(1)));

            let mut bytes = Vec::new();
            head(5, 2, &mut bytes);
            text("messages", &mut bytes);
            head(4, claimed, &mut bytes);
            for _ in 0..present {
                bytes.extend(&element);
            }
            text(if sync { "complete" } else { "has_more" }, &mut bytes);
            bytes.push(0xF5);

            let opcode = if sync { Opcode::SyncResponse } else { Opcode::HistoryPage };
            let result = Payload::decode(opcode, &bytes);
            if claimed > present {
                assert!(result.is_err(), "array shorter than declared must not decode");
            }
        },

        Attack::NestedBody { depth } => {
            let mut bytes = Vec::new();
            head(5, 3, &mut bytes);
            text("correlation", &mut bytes);
            head(0, 1, &mut bytes);
            text("client_time_ms", &mut bytes);
            head(0, 0, &mut bytes);
            text("body", &mut bytes);
            for _ in 0..depth % 4096 {
                head(5, 1, &mut bytes);
                text("body", &mut bytes);
            }
            head(5, 2, &mut bytes);
            text("type", &mut bytes);
            text("text", &mut bytes);
            text("text", &mut bytes);
            text("x", &mut bytes);

            let frame = Frame::new(FrameHeader::new(Opcode::SendMessage), bytes);
            let result = Payload::from_frame(&frame);
            if depth % 4096 > 0 {
                assert!(result.is_err(), "nested body must be rejected");
            }
        },

        Attack::ExtremeValues { id, cursor, limit, created_at, correlation } => {
            let mut message = wire_message(id);
            message.created_at_ms = created_at;
            message.correlation = correlation;

            assert_round_trip(Payload::MessagePush(message.clone()));
            assert_round_trip(Payload::HistoryRequest(HistoryRequest { before: Some(cursor), limit }));
            assert_round_trip(Payload::SyncRequest(SyncRequest { after: cursor, limit }));
            assert_round_trip(Payload::SyncResponse(SyncResponse {
                messages: vec![message.clone(), wire_message(u64::MAX)],
                complete: limit % 2 == 0,
            }));
            assert_round_trip(Payload::HistoryPage(HistoryPage {
                messages: vec![message],
                has_more: cursor % 2 == 0,
            }));
        },

        Attack::LongText { len } => {
            let len = len as usize % (2 * FrameHeader::MAX_PAYLOAD_SIZE as usize);
            let text = "x".repeat(len.max(1));

            let config = OutboundConfig::default();
            let queue = OutboundQueue::<Instant>::new(config, 0);
            match queue.validate(&text) {
                Err(SendError::TooLong { len, max }) => {
                    assert!(len > max && max == config.max_body_bytes);
                },
                Ok(_) => assert!(text.len() <= config.max_body_bytes),
                Err(other) => panic!("unexpected validation error: {other}"),
            }

            let payload = Payload::SendMessage(SendMessage {
                correlation: 1,
                body: WireBody::Text { text },
                client_time_ms: 0,
            });
            let frame = payload.clone().to_frame().expect("payload must encode");
            let mut wire = Vec::new();
            let fits = frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize;
            assert_eq!(frame.encode(&mut wire).is_ok(), fits);
            assert_eq!(Payload::decode(Opcode::SendMessage, &frame.payload).is_ok(), fits);
            if fits {
                let decoded = Frame::decode(&wire).expect("encoded frame must decode");
                assert_eq!(Payload::from_frame(&decoded).expect("payload must decode"), payload);
            }
        },
    }
});
