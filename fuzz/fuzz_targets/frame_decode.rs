//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes off the wire must never panic the decoder:
//! - Truncated or oversized headers
//! - Payload sizes that disagree with the buffer
//! - Wrong magic, version or reserved flags
//!
//! A frame that does decode must re-encode to the bytes it came from.

#![no_main]

use hearth_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut encoded = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut encoded).expect("decoded frame must re-encode");
    assert_eq!(&encoded[..], &data[..encoded.len()], "re-encoding changed the frame");
});
