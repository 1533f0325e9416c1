//! Pong data: the payload answered to unconnected pings, and hijack mode.
//!
//! The payload lives in a single-slot [`watch`] cell. Writers replace the
//! whole `Bytes` value; the read loop takes a cheap clone of the current
//! one for every pong. A reader therefore sees either the old payload or
//! the new one, never a mix.
//!
//! Hijack mode keeps that cell in sync with another server's pong: a
//! background task pings the upstream once per interval and stores what
//! it answered, with the identity fields of game-server descriptors
//! rewritten to point at this listener.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rakgate_protocol::{
    Packet, PongFraming, ProtocolError, UnconnectedPing, UnconnectedPong,
    MAX_DATAGRAM_SIZE, MAX_PONG_PAYLOAD,
};
use rakgate_transport::Session;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::listener::Shared;
use crate::{ListenerError, PingError};

/// Leading marker of a Minecraft server-list descriptor.
const GAME_DESCRIPTOR_MARKER: &[u8] = b"MCPE";

/// Fields a relayed descriptor is padded (or cut) to.
const DESCRIPTOR_FIELDS: usize = 9;

/// Written into the descriptor's server-type field.
const RELAY_LABEL: &[u8] = b"Proxy";

// ---------------------------------------------------------------------------
// PongData
// ---------------------------------------------------------------------------

/// The current pong payload.
pub(crate) struct PongData {
    cell: watch::Sender<Bytes>,
}

impl PongData {
    /// Creates an empty payload cell.
    pub(crate) fn new() -> Self {
        let (cell, _) = watch::channel(Bytes::new());
        Self { cell }
    }

    /// Replaces the payload.
    ///
    /// # Errors
    /// Returns [`ListenerError::PongPayloadTooLarge`] if `payload` is
    /// longer than [`MAX_PONG_PAYLOAD`]. The current payload is kept.
    pub(crate) fn store(&self, payload: Bytes) -> Result<(), ListenerError> {
        if payload.len() > MAX_PONG_PAYLOAD {
            return Err(ListenerError::PongPayloadTooLarge {
                len: payload.len(),
                max: MAX_PONG_PAYLOAD,
            });
        }
        self.cell.send_replace(payload);
        Ok(())
    }

    /// Returns the current payload.
    pub(crate) fn load(&self) -> Bytes {
        self.cell.borrow().clone()
    }

    /// Returns a receiver notified on every replacement.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Bytes> {
        self.cell.subscribe()
    }
}

/// Rewrites an upstream pong payload so it advertises `listener_id`.
///
/// Payloads starting with `MCPE` are `;`-separated descriptors. They are
/// padded with empty fields (or truncated) to exactly nine fields, then
/// field 7 becomes the listener ID, field 8 becomes `Proxy` and field 9 is
/// emptied. Anything else is returned unchanged.
///
/// ```rust
/// use rakgate::relay_payload;
///
/// let relayed = relay_payload(b"MCPE;My Server;390;1.14.60;3;20", 42);
/// assert_eq!(&relayed[..], b"MCPE;My Server;390;1.14.60;3;20;42;Proxy;");
///
/// assert_eq!(&relay_payload(b"plain", 42)[..], b"plain");
/// ```
pub fn relay_payload(upstream: &[u8], listener_id: i64) -> Bytes {
    if !upstream.starts_with(GAME_DESCRIPTOR_MARKER) {
        return Bytes::copy_from_slice(upstream);
    }
    let id = listener_id.to_string();
    let mut fields: Vec<&[u8]> = upstream.split(|&b| b == b';').collect();
    fields.resize(DESCRIPTOR_FIELDS, &b""[..]);
    fields[6] = id.as_bytes();
    fields[7] = RELAY_LABEL;
    fields[8] = &b""[..];
    Bytes::from(fields.join(&b';'))
}

// ---------------------------------------------------------------------------
// Unconnected ping probe
// ---------------------------------------------------------------------------

/// Pings a RakNet server once and returns its pong payload.
///
/// Binds an ephemeral socket of the same family as `addr`, sends an
/// unconnected ping and waits for the pong. Datagrams that are not pongs
/// are skipped. `protocol_version` decides how the payload is framed.
///
/// # Errors
/// - [`PingError::Timeout`] if no pong arrives within `timeout`
/// - [`PingError::Io`] if the socket cannot be set up or used
/// - [`PingError::Protocol`] if the pong is malformed
pub async fn ping(
    addr: SocketAddr,
    protocol_version: u8,
    timeout: Duration,
) -> Result<Bytes, PingError> {
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;

    let request = UnconnectedPing {
        send_timestamp: timestamp_millis(),
        client_guid: rand::rng().random(),
    };
    socket.send(&request.encode()).await?;

    let framing = PongFraming::for_protocol(protocol_version);
    tokio::time::timeout(timeout, await_pong(&socket, framing))
        .await
        .map_err(|_| PingError::Timeout { addr, timeout })?
}

async fn await_pong(
    socket: &UdpSocket,
    framing: PongFraming,
) -> Result<Bytes, PingError> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let len = socket.recv(&mut buf).await?;
        match UnconnectedPong::decode(&buf[..len], framing) {
            Ok(pong) => return Ok(pong.payload),
            Err(ProtocolError::UnexpectedPacket { found, .. }) => {
                tracing::trace!(packet_id = found, "skipping non-pong reply");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Hijack task
// ---------------------------------------------------------------------------

/// Spawns the task that mirrors `upstream`'s pong payload.
///
/// Every `interval` the task pings the upstream (waiting at most one
/// interval for the answer) and stores the relayed payload. Failures are
/// expected when packets get lost and are only traced. Ticks missed while
/// a ping was in flight are skipped rather than bunched up. The task ends
/// when the listener shuts down and never stores a payload after that.
pub(crate) fn spawn_hijack<S: Session>(
    shared: Arc<Shared<S>>,
    upstream: SocketAddr,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let probed = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                probed = ping(upstream, shared.protocol_version, interval) => probed,
            };
            let payload = match probed {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::trace!(%upstream, error = %e, "hijack ping failed");
                    continue;
                }
            };

            if let Err(e) = shared.pong.store(relay_payload(&payload, shared.id)) {
                tracing::trace!(%upstream, error = %e, "hijacked pong not stored");
            }
        }

        tracing::debug!(%upstream, "pong hijack stopped");
    })
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // PongData
    // =====================================================================

    #[test]
    fn test_store_at_limit_succeeds() {
        let pong = PongData::new();
        assert!(pong.load().is_empty());

        pong.store(Bytes::from(vec![b'x'; MAX_PONG_PAYLOAD]))
            .expect("32767 bytes should fit");

        assert_eq!(pong.load().len(), MAX_PONG_PAYLOAD);
    }

    #[test]
    fn test_store_over_limit_keeps_previous_payload() {
        let pong = PongData::new();
        pong.store(Bytes::from_static(b"before")).unwrap();

        let result = pong.store(Bytes::from(vec![0u8; MAX_PONG_PAYLOAD + 1]));

        assert!(matches!(
            result,
            Err(ListenerError::PongPayloadTooLarge { len: 32768, max: 32767 })
        ));
        assert_eq!(&pong.load()[..], b"before");
    }

    #[test]
    fn test_subscribe_sees_replacement() {
        let pong = PongData::new();
        let mut updates = pong.subscribe();

        pong.store(Bytes::from_static(b"fresh")).unwrap();

        assert!(updates.has_changed().unwrap());
        assert_eq!(&updates.borrow_and_update()[..], b"fresh");
    }

    // =====================================================================
    // relay_payload()
    // =====================================================================

    #[test]
    fn test_relay_payload_full_descriptor_rewrites_identity_fields() {
        let upstream =
            b"MCPE;Upstream;390;1.14.60;5;20;13253860892328930865;World;Survival;1;19132";

        let relayed = relay_payload(upstream, 7);

        assert_eq!(
            &relayed[..],
            &b"MCPE;Upstream;390;1.14.60;5;20;7;Proxy;"[..],
            "fields past the ninth are dropped"
        );
    }

    #[test]
    fn test_relay_payload_short_descriptor_is_padded() {
        let relayed = relay_payload(b"MCPE;Only Name", 99);
        assert_eq!(&relayed[..], b"MCPE;Only Name;;;;;99;Proxy;");
    }

    #[test]
    fn test_relay_payload_exactly_nine_fields() {
        let relayed = relay_payload(b"MCPE;a;b;c;d;e;f;g;h", 1);
        assert_eq!(&relayed[..], b"MCPE;a;b;c;d;e;1;Proxy;");
    }

    #[test]
    fn test_relay_payload_other_payload_unchanged() {
        let relayed = relay_payload(b"MCP;not;a;descriptor", 1);
        assert_eq!(&relayed[..], b"MCP;not;a;descriptor");

        assert!(relay_payload(b"", 1).is_empty());
    }

    // =====================================================================
    // ping()
    // =====================================================================

    #[tokio::test]
    async fn test_ping_silent_peer_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let result = ping(addr, 10, Duration::from_millis(100)).await;

        match result {
            Err(PingError::Timeout { addr: a, .. }) => assert_eq!(a, addr),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_skips_non_pong_and_reads_payload() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let request = UnconnectedPing::decode(&buf[..len]).unwrap();

            // Noise first, then the real pong.
            server.send_to(&[0x06, 0x00], from).await.unwrap();
            let pong = UnconnectedPong {
                send_timestamp: request.send_timestamp,
                server_guid: 1,
                payload: Bytes::from_static(b"MCPE;hello"),
            };
            server
                .send_to(&pong.encode(PongFraming::LengthPrefixed), from)
                .await
                .unwrap();
        });

        let payload = ping(addr, 10, Duration::from_secs(2))
            .await
            .expect("ping should succeed");

        assert_eq!(&payload[..], b"MCPE;hello");
        responder.await.unwrap();
    }
}
