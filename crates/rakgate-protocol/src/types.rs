//! Offline message types for the RakNet session-establishment exchange.
//!
//! Before a session exists, client and server swap a handful of
//! "unconnected" messages. The server receives:
//!
//! - [`UnconnectedPing`] — a liveness probe, answered with [`UnconnectedPong`]
//! - [`OpenConnectionRequest1`] — protocol version + MTU probe padding,
//!   answered with [`OpenConnectionReply1`] or [`IncompatibleProtocolVersion`]
//! - [`OpenConnectionRequest2`] — the negotiated MTU and client GUID,
//!   answered with [`OpenConnectionReply2`]
//!
//! All layouts are big-endian and start with a one-byte packet ID.

use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    address_len, ensure, read_address, read_bool, read_i64, read_magic,
    read_u16, read_u8, write_address, write_magic,
};
use crate::{Packet, ProtocolError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The 16-byte marker every offline message carries.
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd,
    0x12, 0x34, 0x56, 0x78,
];

/// The RakNet protocol version spoken by Minecraft: Bedrock Edition.
/// Listeners accept this version by default.
pub const MINECRAFT_PROTOCOL: u8 = 10;

/// Set on the first byte of every connected-session datagram and never on
/// an offline message.
pub const VALID_FLAG: u8 = 0x80;

/// Bytes of IP + UDP header the MTU accounts for on top of the datagram.
pub const UDP_HEADER_OVERHEAD: u16 = 28;

/// The largest datagram the listener reads in one go.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// The largest pong payload: its length must fit a signed 16-bit field.
pub const MAX_PONG_PAYLOAD: usize = i16::MAX as usize;

/// Returns `true` if a leading byte marks a connected-session datagram.
pub fn is_session_datagram(packet_id: u8) -> bool {
    packet_id & VALID_FLAG != 0
}

// ---------------------------------------------------------------------------
// PacketId
// ---------------------------------------------------------------------------

/// Leading byte of every offline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    UnconnectedPing = 0x01,
    UnconnectedPingOpenConnections = 0x02,
    OpenConnectionRequest1 = 0x05,
    OpenConnectionReply1 = 0x06,
    OpenConnectionRequest2 = 0x07,
    OpenConnectionReply2 = 0x08,
    IncompatibleProtocolVersion = 0x19,
    UnconnectedPong = 0x1c,
}

impl TryFrom<u8> for PacketId {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x01 => Self::UnconnectedPing,
            0x02 => Self::UnconnectedPingOpenConnections,
            0x05 => Self::OpenConnectionRequest1,
            0x06 => Self::OpenConnectionReply1,
            0x07 => Self::OpenConnectionRequest2,
            0x08 => Self::OpenConnectionReply2,
            0x19 => Self::IncompatibleProtocolVersion,
            0x1c => Self::UnconnectedPong,
            other => return Err(ProtocolError::UnknownPacket(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// OfflinePacket — what the server can receive
// ---------------------------------------------------------------------------

/// An inbound offline message, decoded from its leading byte.
///
/// The listener matches on this exhaustively instead of switching on raw
/// IDs. Message types the server only ever sends (pongs, replies) are not
/// variants: receiving one is an [`ProtocolError::UnknownPacket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflinePacket {
    /// `0x01` or `0x02`. Both are answered the same way.
    UnconnectedPing(UnconnectedPing),
    /// `0x05`.
    OpenConnectionRequest1(OpenConnectionRequest1),
    /// `0x07`.
    OpenConnectionRequest2(OpenConnectionRequest2),
}

impl OfflinePacket {
    /// Decodes an offline datagram.
    ///
    /// # Errors
    /// - [`ProtocolError::Empty`] for a zero-length datagram
    /// - [`ProtocolError::UnknownPacket`] for any ID that is not a ping or
    ///   an open connection request
    /// - a field-level error if the body is malformed
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&id, mut body)) = datagram.split_first() else {
            return Err(ProtocolError::Empty);
        };
        match PacketId::try_from(id)? {
            PacketId::UnconnectedPing
            | PacketId::UnconnectedPingOpenConnections => {
                UnconnectedPing::read_body(&mut body).map(Self::UnconnectedPing)
            }
            PacketId::OpenConnectionRequest1 => {
                OpenConnectionRequest1::read_body(&mut body)
                    .map(Self::OpenConnectionRequest1)
            }
            PacketId::OpenConnectionRequest2 => {
                OpenConnectionRequest2::read_body(&mut body)
                    .map(Self::OpenConnectionRequest2)
            }
            PacketId::OpenConnectionReply1
            | PacketId::OpenConnectionReply2
            | PacketId::IncompatibleProtocolVersion
            | PacketId::UnconnectedPong => Err(ProtocolError::UnknownPacket(id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Ping / Pong
// ---------------------------------------------------------------------------

/// A liveness probe from a client that has no session.
///
/// Layout: `id, send_timestamp: i64, magic, client_guid: i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconnectedPing {
    /// The client's clock when it sent the ping, echoed in the pong.
    pub send_timestamp: i64,
    /// The client's GUID.
    pub client_guid: i64,
}

impl Packet for UnconnectedPing {
    const ID: u8 = PacketId::UnconnectedPing as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.send_timestamp);
        write_magic(buf);
        buf.put_i64(self.client_guid);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let send_timestamp = read_i64(buf, "send timestamp")?;
        read_magic(buf)?;
        let client_guid = read_i64(buf, "client guid")?;
        Ok(Self {
            send_timestamp,
            client_guid,
        })
    }
}

/// How the pong payload is framed on the wire.
///
/// Minecraft-flavoured RakNet writes a 16-bit length before the payload;
/// plain RakNet lets the payload run to the end of the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongFraming {
    /// `u16` length, then the payload.
    LengthPrefixed,
    /// The payload is the rest of the datagram.
    Raw,
}

impl PongFraming {
    /// The framing a listener speaking `protocol_version` uses.
    pub fn for_protocol(protocol_version: u8) -> Self {
        if protocol_version == MINECRAFT_PROTOCOL {
            Self::LengthPrefixed
        } else {
            Self::Raw
        }
    }
}

/// The answer to an [`UnconnectedPing`].
///
/// Layout: `id, send_timestamp: i64, server_guid: i64, magic,
/// [payload length: u16], payload`.
///
/// Unlike the other messages this one does not implement [`Packet`]: its
/// body cannot be read without knowing the [`PongFraming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    /// Echo of [`UnconnectedPing::send_timestamp`].
    pub send_timestamp: i64,
    /// The server's instance identifier.
    pub server_guid: i64,
    /// Operator-defined metadata, often a server-list descriptor.
    pub payload: Bytes,
}

impl UnconnectedPong {
    /// Serializes the pong, ID byte included.
    pub fn encode(&self, framing: PongFraming) -> Bytes {
        let mut buf = BytesMut::with_capacity(35 + 2 + self.payload.len());
        buf.put_u8(PacketId::UnconnectedPong as u8);
        buf.put_i64(self.send_timestamp);
        buf.put_i64(self.server_guid);
        write_magic(&mut buf);
        if framing == PongFraming::LengthPrefixed {
            // Callers keep payloads within MAX_PONG_PAYLOAD.
            buf.put_u16(self.payload.len() as u16);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses a whole pong datagram.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the ID is wrong or a field is
    /// truncated, including a length prefix that overruns the datagram.
    pub fn decode(
        datagram: &[u8],
        framing: PongFraming,
    ) -> Result<Self, ProtocolError> {
        let mut buf = datagram;
        let id = read_u8(&mut buf, "packet id")?;
        if id != PacketId::UnconnectedPong as u8 {
            return Err(ProtocolError::UnexpectedPacket {
                expected: PacketId::UnconnectedPong as u8,
                found: id,
            });
        }
        let send_timestamp = read_i64(&mut buf, "send timestamp")?;
        let server_guid = read_i64(&mut buf, "server guid")?;
        read_magic(&mut buf)?;
        let payload = match framing {
            PongFraming::LengthPrefixed => {
                let len = read_u16(&mut buf, "pong payload length")? as usize;
                ensure(buf, len, "pong payload")?;
                Bytes::copy_from_slice(&buf[..len])
            }
            PongFraming::Raw => Bytes::copy_from_slice(buf),
        };
        Ok(Self {
            send_timestamp,
            server_guid,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Open connection request/reply 1
// ---------------------------------------------------------------------------

/// First handshake step: the client announces its protocol version and
/// pads the datagram to the MTU it wants to probe.
///
/// Layout: `id, magic, protocol_version: u8, zero padding`.
///
/// `mtu` is not a wire field: it is the size of the whole datagram plus
/// [`UDP_HEADER_OVERHEAD`]. Decoding derives it from the bytes received,
/// encoding pads the datagram until it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest1 {
    /// The RakNet protocol version the client speaks.
    pub protocol_version: u8,
    /// Datagram size + IP/UDP header overhead.
    pub mtu: u16,
}

/// ID + magic + protocol byte.
const REQUEST1_HEADER_LEN: usize = 1 + 16 + 1;

impl Packet for OpenConnectionRequest1 {
    const ID: u8 = PacketId::OpenConnectionRequest1 as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        write_magic(buf);
        buf.put_u8(self.protocol_version);
        let padding = (self.mtu as usize)
            .saturating_sub(UDP_HEADER_OVERHEAD as usize)
            .saturating_sub(REQUEST1_HEADER_LEN);
        buf.put_bytes(0, padding);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        read_magic(buf)?;
        let protocol_version = read_u8(buf, "protocol version")?;
        let padding = buf.len();
        buf.advance(padding);
        let datagram_len = REQUEST1_HEADER_LEN + padding;
        let mtu = u16::try_from(datagram_len)
            .unwrap_or(u16::MAX)
            .saturating_add(UDP_HEADER_OVERHEAD);
        Ok(Self {
            protocol_version,
            mtu,
        })
    }
}

/// Accepts the client's protocol version and tells it the MTU to use.
///
/// Layout: `id, magic, server_guid: i64, use_security: u8, mtu: u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply1 {
    /// The server's instance identifier.
    pub server_guid: i64,
    /// Whether the server requires a secured connection. Always `false`
    /// for this listener.
    pub use_security: bool,
    /// The MTU observed from the request.
    pub mtu: u16,
}

impl Packet for OpenConnectionReply1 {
    const ID: u8 = PacketId::OpenConnectionReply1 as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        write_magic(buf);
        buf.put_i64(self.server_guid);
        buf.put_u8(self.use_security as u8);
        buf.put_u16(self.mtu);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        read_magic(buf)?;
        Ok(Self {
            server_guid: read_i64(buf, "server guid")?,
            use_security: read_bool(buf, "use security")?,
            mtu: read_u16(buf, "mtu")?,
        })
    }
}

/// Rejects an [`OpenConnectionRequest1`] whose protocol version the
/// server does not speak.
///
/// Layout: `id, protocol_version: u8, magic, server_guid: i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompatibleProtocolVersion {
    /// The only version the server accepts.
    pub protocol_version: u8,
    /// The server's instance identifier.
    pub server_guid: i64,
}

impl Packet for IncompatibleProtocolVersion {
    const ID: u8 = PacketId::IncompatibleProtocolVersion as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.protocol_version);
        write_magic(buf);
        buf.put_i64(self.server_guid);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let protocol_version = read_u8(buf, "protocol version")?;
        read_magic(buf)?;
        Ok(Self {
            protocol_version,
            server_guid: read_i64(buf, "server guid")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Open connection request/reply 2
// ---------------------------------------------------------------------------

/// Second handshake step: the client confirms the MTU and introduces
/// itself with its GUID.
///
/// Layout: `id, magic, server_address, mtu: u16, client_guid: i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest2 {
    /// The server address as the client sees it.
    pub server_address: SocketAddr,
    /// The MTU the client settled on.
    pub mtu: u16,
    /// The client's GUID.
    pub client_guid: i64,
}

impl Packet for OpenConnectionRequest2 {
    const ID: u8 = PacketId::OpenConnectionRequest2 as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        write_magic(buf);
        write_address(buf, &self.server_address);
        buf.put_u16(self.mtu);
        buf.put_i64(self.client_guid);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        read_magic(buf)?;
        Ok(Self {
            server_address: read_address(buf)?,
            mtu: read_u16(buf, "mtu")?,
            client_guid: read_i64(buf, "client guid")?,
        })
    }
}

/// Completes the offline handshake. After this the client talks to the
/// session layer.
///
/// Layout: `id, magic, server_guid: i64, client_address, mtu: u16,
/// encryption_enabled: u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply2 {
    /// The server's instance identifier.
    pub server_guid: i64,
    /// The client address as the server observed it.
    pub client_address: SocketAddr,
    /// The MTU both sides will use.
    pub mtu: u16,
    /// Always `false` for this listener.
    pub encryption_enabled: bool,
}

impl Packet for OpenConnectionReply2 {
    const ID: u8 = PacketId::OpenConnectionReply2 as u8;

    fn write_body(&self, buf: &mut BytesMut) {
        buf.reserve(16 + 8 + address_len(&self.client_address) + 3);
        write_magic(buf);
        buf.put_i64(self.server_guid);
        write_address(buf, &self.client_address);
        buf.put_u16(self.mtu);
        buf.put_u8(self.encryption_enabled as u8);
    }

    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        read_magic(buf)?;
        Ok(Self {
            server_guid: read_i64(buf, "server guid")?,
            client_address: read_address(buf)?,
            mtu: read_u16(buf, "mtu")?,
            encryption_enabled: read_bool(buf, "encryption enabled")?,
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    // =====================================================================
    // OfflinePacket::decode()
    // =====================================================================

    #[test]
    fn test_decode_empty_datagram_returns_empty() {
        assert_eq!(OfflinePacket::decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_decode_ping_open_connections_is_a_ping() {
        let mut bytes = BytesMut::from(
            &UnconnectedPing {
                send_timestamp: 7,
                client_guid: 8,
            }
            .encode()[..],
        );
        bytes[0] = PacketId::UnconnectedPingOpenConnections as u8;

        let decoded = OfflinePacket::decode(&bytes).expect("should decode");

        assert_eq!(
            decoded,
            OfflinePacket::UnconnectedPing(UnconnectedPing {
                send_timestamp: 7,
                client_guid: 8,
            })
        );
    }

    #[test]
    fn test_decode_server_side_ids_are_unknown() {
        // A server never receives its own replies.
        let reply = OpenConnectionReply1 {
            server_guid: 1,
            use_security: false,
            mtu: 1400,
        }
        .encode();

        assert_eq!(
            OfflinePacket::decode(&reply),
            Err(ProtocolError::UnknownPacket(0x06))
        );
    }

    #[test]
    fn test_decode_unlisted_id_returns_unknown() {
        assert_eq!(
            OfflinePacket::decode(&[0x42, 1, 2, 3]),
            Err(ProtocolError::UnknownPacket(0x42))
        );
    }

    #[test]
    fn test_decode_truncated_ping_returns_truncated() {
        let result = OfflinePacket::decode(&[0x01, 0, 0, 0]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                field: "send timestamp",
                needed: 8,
                remaining: 3
            })
        ));
    }

    #[test]
    fn test_decode_bad_magic_returns_invalid_magic() {
        let mut bytes = BytesMut::from(
            &OpenConnectionRequest1 {
                protocol_version: 10,
                mtu: 600,
            }
            .encode()[..],
        );
        bytes[1] = 0x99;

        assert_eq!(
            OfflinePacket::decode(&bytes),
            Err(ProtocolError::InvalidMagic)
        );
    }

    // =====================================================================
    // OpenConnectionRequest1 MTU accounting
    // =====================================================================

    #[test]
    fn test_request1_mtu_is_datagram_len_plus_overhead() {
        let mut datagram = BytesMut::new();
        datagram.put_u8(PacketId::OpenConnectionRequest1 as u8);
        datagram.put_slice(&MAGIC);
        datagram.put_u8(MINECRAFT_PROTOCOL);
        datagram.put_bytes(0, 1000);

        let packet =
            OpenConnectionRequest1::decode(&datagram).expect("should decode");

        assert_eq!(packet.protocol_version, MINECRAFT_PROTOCOL);
        assert_eq!(packet.mtu as usize, datagram.len() + 28);
    }

    #[test]
    fn test_request1_encode_pads_to_requested_mtu() {
        let bytes = OpenConnectionRequest1 {
            protocol_version: 11,
            mtu: 1492,
        }
        .encode();

        assert_eq!(bytes.len(), 1492 - 28);
        let decoded = OpenConnectionRequest1::decode(&bytes).unwrap();
        assert_eq!(decoded.mtu, 1492);
        assert_eq!(decoded.protocol_version, 11);
    }

    // =====================================================================
    // Fixed layouts
    // =====================================================================

    #[test]
    fn test_reply1_layout_matches_wire_order() {
        let bytes = OpenConnectionReply1 {
            server_guid: 0x0102_0304_0506_0708,
            use_security: false,
            mtu: 1200,
        }
        .encode();

        assert_eq!(bytes[0], 0x06);
        assert_eq!(&bytes[1..17], &MAGIC);
        assert_eq!(&bytes[17..25], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[25], 0);
        assert_eq!(&bytes[26..28], &1200u16.to_be_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn test_incompatible_protocol_version_puts_version_first() {
        let bytes = IncompatibleProtocolVersion {
            protocol_version: 10,
            server_guid: 5,
        }
        .encode();

        assert_eq!(bytes[0], 0x19);
        assert_eq!(bytes[1], 10);
        assert_eq!(&bytes[2..18], &MAGIC);
        assert_eq!(&bytes[18..26], &5i64.to_be_bytes());
    }

    #[test]
    fn test_request2_decodes_address_mtu_and_guid() {
        let request = OpenConnectionRequest2 {
            server_address: addr("127.0.0.1:19132"),
            mtu: 1400,
            client_guid: -42,
        };

        let decoded = OpenConnectionRequest2::decode(&request.encode())
            .expect("should decode");

        assert_eq!(decoded, request);
    }

    #[test]
    fn test_reply2_carries_observed_client_address() {
        let reply = OpenConnectionReply2 {
            server_guid: 99,
            client_address: addr("[::1]:50000"),
            mtu: 1400,
            encryption_enabled: false,
        };

        let bytes = reply.encode();

        assert_eq!(bytes.len(), 1 + 16 + 8 + 29 + 2 + 1);
        assert_eq!(OpenConnectionReply2::decode(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_packet_decode_wrong_id_returns_unexpected_packet() {
        let ping = UnconnectedPing {
            send_timestamp: 1,
            client_guid: 2,
        }
        .encode();

        assert_eq!(
            OpenConnectionRequest2::decode(&ping),
            Err(ProtocolError::UnexpectedPacket {
                expected: 0x07,
                found: 0x01
            })
        );
    }

    // =====================================================================
    // UnconnectedPong framing
    // =====================================================================

    #[test]
    fn test_pong_length_prefixed_writes_u16_length() {
        let pong = UnconnectedPong {
            send_timestamp: 11,
            server_guid: 22,
            payload: Bytes::from_static(b"MCPE;hello"),
        };

        let bytes = pong.encode(PongFraming::LengthPrefixed);

        assert_eq!(&bytes[1..9], &11i64.to_be_bytes());
        assert_eq!(&bytes[9..17], &22i64.to_be_bytes());
        assert_eq!(&bytes[33..35], &10u16.to_be_bytes());
        assert_eq!(&bytes[35..], b"MCPE;hello");
        assert_eq!(
            UnconnectedPong::decode(&bytes, PongFraming::LengthPrefixed)
                .unwrap(),
            pong
        );
    }

    #[test]
    fn test_pong_raw_framing_has_no_length() {
        let pong = UnconnectedPong {
            send_timestamp: 1,
            server_guid: 2,
            payload: Bytes::from_static(b"abc"),
        };

        let bytes = pong.encode(PongFraming::Raw);

        assert_eq!(bytes.len(), 33 + 3);
        assert_eq!(&bytes[33..], b"abc");
    }

    #[test]
    fn test_pong_decode_overlong_length_returns_truncated() {
        let mut bytes = BytesMut::from(
            &UnconnectedPong {
                send_timestamp: 1,
                server_guid: 2,
                payload: Bytes::from_static(b"abc"),
            }
            .encode(PongFraming::LengthPrefixed)[..],
        );
        bytes[33..35].copy_from_slice(&500u16.to_be_bytes());

        assert!(matches!(
            UnconnectedPong::decode(&bytes, PongFraming::LengthPrefixed),
            Err(ProtocolError::Truncated {
                field: "pong payload",
                ..
            })
        ));
    }

    #[test]
    fn test_pong_framing_for_protocol() {
        assert_eq!(
            PongFraming::for_protocol(MINECRAFT_PROTOCOL),
            PongFraming::LengthPrefixed
        );
        assert_eq!(PongFraming::for_protocol(6), PongFraming::Raw);
    }

    #[test]
    fn test_is_session_datagram_checks_valid_flag() {
        assert!(is_session_datagram(0x84));
        assert!(is_session_datagram(0xc0));
        assert!(!is_session_datagram(0x05));
        assert!(!is_session_datagram(0x1c));
    }
}
