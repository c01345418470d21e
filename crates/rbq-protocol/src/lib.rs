//! RBQ1 wire protocol.
//!
//! Every message is a 12-byte header followed by a payload of
//! tag-length-value records. All integers are big-endian.
//!
//! ```text
//! offset 0  : 4 bytes  magic "RBQ1"
//! offset 4  : 1 byte   protocol version (1)
//! offset 5  : 1 byte   message type
//! offset 6  : 2 bytes  flags (0 on encode, ignored on decode)
//! offset 8  : 4 bytes  payload length L
//! offset 12 : L bytes  TLV records: [tag u8][len u16][value]
//! ```

mod codec;
mod message;

pub use codec::{decode, encode, MessageCodec};
pub use message::{tags, Message, MessageType, Tlv, TlvValue};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Buffer too short: need 12 header bytes, got {0}")]
    BufferTooShort(usize),

    #[error("Bad magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Truncated payload: header declares {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("Truncated TLV at offset {offset}")]
    TruncatedTlv { offset: usize },

    #[error("TLV value for tag {tag:#04x} is {len} bytes (max {max})", max = u16::MAX)]
    ValueTooLong { tag: u8, len: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for malformed or truncated wire bytes, as opposed to encoding
    /// mistakes by the caller or socket failures.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::BufferTooShort(_)
                | ProtocolError::BadMagic(_)
                | ProtocolError::UnsupportedVersion(_)
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::TruncatedPayload { .. }
                | ProtocolError::TruncatedTlv { .. }
                | ProtocolError::PayloadTooLarge(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

pub const MAGIC: &[u8; 4] = b"RBQ1";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 12;

/// Largest payload the stream codec will buffer: 16MB
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;
