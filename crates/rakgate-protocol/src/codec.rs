//! Packet trait and the low-level field readers/writers shared by every
//! offline message.
//!
//! Offline messages are fixed big-endian layouts, so there is no
//! self-describing format to lean on. Instead each message type
//! implements [`Packet`]: it knows its own ID, how to write its body, and
//! how to read its body back. The provided [`Packet::encode`] and
//! [`Packet::decode`] methods take care of the leading ID byte.
//!
//! Reading works on `&mut &[u8]` cursors through [`bytes::Buf`]. `Buf`'s
//! own getters panic on short input, so every read here is length-checked
//! first.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ProtocolError, MAGIC};

/// `AF_INET6` as RakNet peers write it (the Windows value). Readers skip
/// this field.
const AF_INET6: u16 = 23;

/// A fixed-layout offline message.
///
/// ## Example
///
/// ```rust
/// use rakgate_protocol::{Packet, UnconnectedPing};
///
/// let ping = UnconnectedPing { send_timestamp: 1234, client_guid: 99 };
/// let bytes = ping.encode();
///
/// let decoded = UnconnectedPing::decode(&bytes).unwrap();
/// assert_eq!(ping, decoded);
/// ```
pub trait Packet: Sized {
    /// The leading byte that identifies this message on the wire.
    const ID: u8;

    /// Writes everything after the ID byte.
    fn write_body(&self, buf: &mut BytesMut);

    /// Reads everything after the ID byte.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if a field is truncated or invalid.
    fn read_body(buf: &mut &[u8]) -> Result<Self, ProtocolError>;

    /// Serializes the message, ID byte included.
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(Self::ID);
        self.write_body(&mut buf);
        buf.freeze()
    }

    /// Parses a whole datagram as this message.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnexpectedPacket`] if the first byte is
    /// not [`Self::ID`], or whatever [`Self::read_body`] reports.
    fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = datagram;
        let id = read_u8(&mut buf, "packet id")?;
        if id != Self::ID {
            return Err(ProtocolError::UnexpectedPacket {
                expected: Self::ID,
                found: id,
            });
        }
        Self::read_body(&mut buf)
    }
}

// ---------------------------------------------------------------------------
// Checked readers
// ---------------------------------------------------------------------------

pub(crate) fn ensure(
    buf: &[u8],
    needed: usize,
    field: &'static str,
) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            field,
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u8(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<u8, ProtocolError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_bool(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<bool, ProtocolError> {
    Ok(read_u8(buf, field)? != 0)
}

pub(crate) fn read_u16(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<u16, ProtocolError> {
    ensure(buf, 2, field)?;
    Ok(buf.get_u16())
}

pub(crate) fn read_i64(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<i64, ProtocolError> {
    ensure(buf, 8, field)?;
    Ok(buf.get_i64())
}

pub(crate) fn read_magic(buf: &mut &[u8]) -> Result<(), ProtocolError> {
    ensure(buf, MAGIC.len(), "magic")?;
    if buf[..MAGIC.len()] != MAGIC {
        return Err(ProtocolError::InvalidMagic);
    }
    buf.advance(MAGIC.len());
    Ok(())
}

pub(crate) fn write_magic(buf: &mut BytesMut) {
    buf.put_slice(&MAGIC);
}

// ---------------------------------------------------------------------------
// System addresses
// ---------------------------------------------------------------------------

/// Writes a RakNet system address.
///
/// IPv4: version byte `4`, the four octets bitwise inverted, port.
/// IPv6: version byte `6`, address family (little-endian), port,
/// flow info, the sixteen octets, scope id.
pub fn write_address(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(4);
            for octet in v4.ip().octets() {
                buf.put_u8(!octet);
            }
            buf.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(6);
            buf.put_u16_le(AF_INET6);
            buf.put_u16(v6.port());
            buf.put_u32(v6.flowinfo());
            buf.put_slice(&v6.ip().octets());
            buf.put_u32(v6.scope_id());
        }
    }
}

/// Reads a RakNet system address written by [`write_address`].
///
/// # Errors
/// Returns [`ProtocolError::InvalidAddressVersion`] for any version byte
/// other than 4 or 6, or [`ProtocolError::Truncated`] on short input.
pub fn read_address(buf: &mut &[u8]) -> Result<SocketAddr, ProtocolError> {
    match read_u8(buf, "address version")? {
        4 => {
            ensure(buf, 6, "ipv4 address")?;
            let mut octets = [0u8; 4];
            for octet in &mut octets {
                *octet = !buf.get_u8();
            }
            let port = buf.get_u16();
            Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
        }
        6 => {
            ensure(buf, 28, "ipv6 address")?;
            buf.advance(2); // family
            let port = buf.get_u16();
            let flowinfo = buf.get_u32();
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let scope_id = buf.get_u32();
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            )))
        }
        other => Err(ProtocolError::InvalidAddressVersion(other)),
    }
}

/// The encoded size of an address, used to pre-size reply buffers.
pub(crate) fn address_len(addr: &SocketAddr) -> usize {
    match addr.ip() {
        IpAddr::V4(_) => 7,
        IpAddr::V6(_) => 29,
    }
}
