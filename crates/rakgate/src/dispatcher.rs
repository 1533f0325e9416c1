//! The read loop and the offline handshake.
//!
//! One task owns the socket's receive side and handles every datagram in
//! order. For each one it looks up the sender:
//!
//! ```text
//!                       ┌─ Established ──→ session.receive(datagram)
//! recv_from ─→ table ───┤
//!                       └─ Unestablished ─→ OfflinePacket::decode
//!                                             ├─ Ping       → Pong
//!                                             ├─ Request1   → Reply1 | Incompatible
//!                                             └─ Request2   → Reply2, create session,
//!                                                             register, enqueue
//! ```
//!
//! A peer that got a Reply1 is not remembered: Request2 is honoured on its
//! own, so unauthenticated peers never cost the listener any state.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rakgate_protocol::{
    is_session_datagram, IncompatibleProtocolVersion, OfflinePacket,
    OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1,
    OpenConnectionRequest2, Packet, ProtocolError, UnconnectedPing,
    UnconnectedPong, MAX_DATAGRAM_SIZE,
};
use rakgate_transport::{Session, SessionFactory};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::listener::Shared;
use crate::DispatchError;

/// Callback receiving every per-datagram error, with the sender's
/// address. Installed with
/// [`ListenerBuilder::error_sink`](crate::ListenerBuilder::error_sink).
pub type ErrorSink = Arc<dyn Fn(SocketAddr, &DispatchError) + Send + Sync>;

/// Where a peer stands, as far as the listener knows.
enum PeerState<S> {
    /// No session: datagrams are offline messages.
    Unestablished,
    /// Every datagram belongs to this session.
    Established(Arc<S>),
}

/// Owns the read side of the listener.
///
/// Dropping the dispatcher (when [`run`](Self::run) returns) closes the
/// accept queue and releases its reference to the socket.
pub(crate) struct Dispatcher<F: SessionFactory> {
    socket: Arc<UdpSocket>,
    factory: F,
    shared: Arc<Shared<F::Session>>,
    accepted: mpsc::Sender<Arc<F::Session>>,
}

impl<F: SessionFactory> Dispatcher<F> {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        factory: F,
        shared: Arc<Shared<F::Session>>,
        accepted: mpsc::Sender<Arc<F::Session>>,
    ) -> Self {
        Self {
            socket,
            factory,
            shared,
            accepted,
        }
    }

    /// Reads datagrams until the listener shuts down or the socket fails.
    ///
    /// The buffer is reused across reads; each datagram is copied out
    /// before it is handled.
    pub(crate) async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, addr) = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading from UDP socket, read loop stopped");
                        break;
                    }
                },
            };

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            if let Err(err) = self.handle(addr, datagram).await {
                self.report(addr, &err);
            }
        }

        tracing::debug!("read loop finished");
    }

    fn peer_state(&self, addr: &SocketAddr) -> PeerState<F::Session> {
        match self.shared.sessions.get(addr) {
            Some(session) => PeerState::Established(session),
            None => PeerState::Unestablished,
        }
    }

    async fn handle(
        &self,
        addr: SocketAddr,
        datagram: Bytes,
    ) -> Result<(), DispatchError> {
        match self.peer_state(&addr) {
            PeerState::Established(session) => Ok(session.receive(datagram)?),
            PeerState::Unestablished => self.handle_offline(addr, &datagram).await,
        }
    }

    async fn handle_offline(
        &self,
        addr: SocketAddr,
        datagram: &[u8],
    ) -> Result<(), DispatchError> {
        let packet = match OfflinePacket::decode(datagram) {
            Ok(packet) => packet,
            Err(ProtocolError::UnknownPacket(id)) if is_session_datagram(id) => {
                // Left over from a session that is already gone.
                tracing::trace!(%addr, packet_id = id, "ignoring session datagram from unknown peer");
                return Ok(());
            }
            Err(ProtocolError::UnknownPacket(id)) => {
                return Err(DispatchError::UnknownPacket {
                    id,
                    len: datagram.len(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match packet {
            OfflinePacket::UnconnectedPing(ping) => self.handle_ping(addr, ping).await,
            OfflinePacket::OpenConnectionRequest1(request) => {
                self.handle_request1(addr, request).await
            }
            OfflinePacket::OpenConnectionRequest2(request) => {
                self.handle_request2(addr, request).await
            }
        }
    }

    async fn handle_ping(
        &self,
        addr: SocketAddr,
        ping: UnconnectedPing,
    ) -> Result<(), DispatchError> {
        let pong = UnconnectedPong {
            send_timestamp: ping.send_timestamp,
            server_guid: self.shared.id,
            payload: self.shared.pong.load(),
        };
        self.send(addr, "unconnected pong", &pong.encode(self.shared.framing))
            .await
    }

    async fn handle_request1(
        &self,
        addr: SocketAddr,
        request: OpenConnectionRequest1,
    ) -> Result<(), DispatchError> {
        let server = self.shared.protocol_version;
        if request.protocol_version != server {
            let reply = IncompatibleProtocolVersion {
                protocol_version: server,
                server_guid: self.shared.id,
            };
            self.send(addr, "incompatible protocol version", &reply.encode())
                .await?;
            return Err(DispatchError::IncompatibleProtocol {
                client: request.protocol_version,
                server,
            });
        }

        let reply = OpenConnectionReply1 {
            server_guid: self.shared.id,
            use_security: false,
            mtu: request.mtu,
        };
        self.send(addr, "open connection reply 1", &reply.encode())
            .await
    }

    async fn handle_request2(
        &self,
        addr: SocketAddr,
        request: OpenConnectionRequest2,
    ) -> Result<(), DispatchError> {
        let reply = OpenConnectionReply2 {
            server_guid: self.shared.id,
            client_address: addr,
            mtu: request.mtu,
            encryption_enabled: false,
        };
        self.send(addr, "open connection reply 2", &reply.encode())
            .await?;
        if self.shared.shutdown.is_cancelled() {
            tracing::debug!(%addr, "listener closing, session not created");
            return Ok(());
        }

        let session = Arc::new(self.factory.create(
            Arc::clone(&self.socket),
            addr,
            request.mtu,
            request.client_guid,
        ));
        // A duplicate Request2 displaces the earlier handle. It is not
        // closed here; whoever holds it still owns it.
        self.shared.sessions.insert(Arc::clone(&session));
        tracing::debug!(
            %addr,
            mtu = request.mtu,
            client_guid = request.client_guid,
            "session negotiated"
        );

        // A full queue holds up the read loop until accept() catches up.
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Ok(()),
            sent = self.accepted.send(session) => {
                sent.map_err(|_| DispatchError::QueueClosed)
            }
        }
    }

    async fn send(
        &self,
        addr: SocketAddr,
        packet: &'static str,
        datagram: &[u8],
    ) -> Result<(), DispatchError> {
        self.socket
            .send_to(datagram, addr)
            .await
            .map(|_| ())
            .map_err(|source| DispatchError::Send { packet, source })
    }

    fn report(&self, addr: SocketAddr, err: &DispatchError) {
        if err.is_rejection() {
            tracing::info!(%addr, error = %err, "connection rejected");
        } else {
            tracing::warn!(%addr, error = %err, "error handling datagram");
        }
        if let Some(sink) = &self.shared.error_sink {
            sink(addr, err);
        }
    }
}
