//! Offline wire protocol for Rakgate.
//!
//! This crate defines the messages a RakNet server exchanges with a peer
//! that does not have a session yet:
//!
//! - **Types** ([`OfflinePacket`], [`UnconnectedPong`],
//!   [`OpenConnectionReply1`], etc.) — the fixed binary layouts.
//! - **Codec** ([`Packet`] trait, system address helpers) — how those
//!   layouts are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can be wrong with a datagram.
//!
//! # Architecture
//!
//! The protocol layer is pure: it never touches a socket. The listener
//! reads a datagram, hands the bytes here, and gets back a typed message.
//!
//! ```text
//! UDP socket (bytes) → Protocol (OfflinePacket) → Listener (handshake state)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{read_address, write_address, Packet};
pub use error::ProtocolError;
pub use types::{
    is_session_datagram, IncompatibleProtocolVersion, OfflinePacket,
    OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1,
    OpenConnectionRequest2, PacketId, PongFraming, UnconnectedPing,
    UnconnectedPong, MAGIC, MAX_DATAGRAM_SIZE, MAX_PONG_PAYLOAD,
    MINECRAFT_PROTOCOL, UDP_HEADER_OVERHEAD, VALID_FLAG,
};
