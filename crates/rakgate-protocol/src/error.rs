//! Error types for the protocol layer.
//!
//! Each crate in Rakgate defines its own error enum. A `ProtocolError`
//! always means "these bytes are not a well-formed offline message" and
//! never "the network is broken": decoding is pure and does no I/O.

/// Errors that can occur while decoding an offline message.
///
/// Every datagram that reaches the decoder comes from an unauthenticated
/// peer, so every field read is bounds-checked and reported through one
/// of these variants instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The datagram had no bytes at all, not even a packet ID.
    #[error("empty datagram")]
    Empty,

    /// A field ran past the end of the datagram.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Which field was being read.
        field: &'static str,
        /// How many bytes the field needs.
        needed: usize,
        /// How many bytes were left.
        remaining: usize,
    },

    /// The 16-byte offline message magic did not match.
    #[error("offline message magic mismatch")]
    InvalidMagic,

    /// A system address used an IP version other than 4 or 6.
    #[error("unsupported address version {0}")]
    InvalidAddressVersion(u8),

    /// The datagram was decoded as one message type but carries the ID
    /// of another.
    #[error("unexpected packet id {found:#04x}, expected {expected:#04x}")]
    UnexpectedPacket {
        /// The ID the decoder was asked to read.
        expected: u8,
        /// The ID actually found in the first byte.
        found: u8,
    },

    /// The leading byte is not an offline message this layer handles.
    #[error("unknown offline packet id {0:#04x}")]
    UnknownPacket(u8),
}
