//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure serialized as raw binary
//! (Big Endian). The client reads the opcode and request id straight from the
//! header and only decodes the CBOR payload once it knows where the frame is
//! going.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so the struct has alignment 1 and
/// every 16-byte pattern is a valid value. Semantic validation (magic,
/// version, size limit) happens in [`FrameHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],             // 0x48525448 ("HRTH" in ASCII)
    version: u8,                // 0x01
    flags: u8,                  // reserved, must be zero
    pub(crate) opcode: [u8; 2], // u16 operation code

    request_id: [u8; 4],              // u32 request/response correlation
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl FrameHeader {
    /// Size of the serialized header (16 bytes)
    pub const SIZE: usize = 16;

    /// Magic number: "HRTH" in ASCII (0x48525448)
    pub const MAGIC: u32 = 0x4852_5448;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a new header with the specified opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Create a header for a request/response pair.
    #[must_use]
    pub fn with_request_id(opcode: Opcode, request_id: u32) -> Self {
        let mut header = Self::new(opcode);
        header.set_request_id(request_id);
        header
    }

    /// Parse header from network bytes (zero-copy)
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 16 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce for request/response correlation. Zero for
    /// unsolicited frames.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Set client request nonce for response correlation.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("opcode", &format_args!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_parses() {
        let header = FrameHeader::with_request_id(Opcode::HistoryRequest, 7);
        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).map(|h| *h);

        assert_eq!(parsed, Ok(header));
        assert_eq!(header.opcode_enum(), Some(Opcode::HistoryRequest));
        assert_eq!(header.request_id(), 7);
    }

    #[test]
    fn short_buffer_rejected() {
        let result = FrameHeader::from_bytes(&[0u8; 8]);
        assert!(matches!(result, Err(ProtocolError::FrameTooShort { expected: 16, actual: 8 })));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[0] = b'X';
        assert_eq!(FrameHeader::from_bytes(&bytes).err(), Some(ProtocolError::InvalidMagic));
    }

    #[test]
    fn bad_version_rejected() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[4] = 9;
        assert_eq!(FrameHeader::from_bytes(&bytes).err(), Some(ProtocolError::UnsupportedVersion(9)));
    }

    #[test]
    fn oversized_payload_claim_rejected() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[12..16].copy_from_slice(&(FrameHeader::MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
