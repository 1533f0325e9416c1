//! Raw pass-through session: no reliability, no ordering, no framing.
//!
//! Every datagram the peer sends after the offline handshake is queued
//! as-is for [`RawSession::recv`], and [`RawSession::send`] writes
//! straight to the shared socket. The first datagram received counts as
//! the session-layer handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rakgate_protocol::UDP_HEADER_OVERHEAD;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::sync::mpsc::error::TrySendError;

use crate::{Session, SessionFactory, SessionSignals, TransportError};

/// Datagrams buffered per session before new ones are dropped.
const INBOUND_CAPACITY: usize = 256;

/// An unreliable session over the listener's UDP socket.
pub struct RawSession {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    mtu: u16,
    client_guid: i64,
    signals: SessionSignals,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl RawSession {
    /// Creates a session for `remote_addr` on `socket`.
    pub fn new(
        socket: Arc<UdpSocket>,
        remote_addr: SocketAddr,
        mtu: u16,
        client_guid: i64,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            socket,
            remote_addr,
            mtu,
            client_guid,
            signals: SessionSignals::new(),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        }
    }

    /// Sends one datagram to the peer.
    ///
    /// # Errors
    /// - [`TransportError::Closed`] after [`Session::close`]
    /// - [`TransportError::Oversized`] if the datagram does not fit the MTU
    /// - [`TransportError::SendFailed`] if the socket write fails
    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.signals.is_closed() {
            return Err(TransportError::Closed(self.remote_addr));
        }
        let limit = self.mtu.saturating_sub(UDP_HEADER_OVERHEAD) as usize;
        if data.len() > limit {
            return Err(TransportError::Oversized {
                len: data.len(),
                mtu: self.mtu,
            });
        }
        self.socket
            .send_to(data, self.remote_addr)
            .await
            .map_err(TransportError::SendFailed)?;
        Ok(())
    }

    /// Receives the next datagram from the peer.
    ///
    /// Returns `Ok(None)` once the session is closed.
    pub async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.signals.closed() => Ok(None),
            datagram = inbound.recv() => Ok(datagram),
        }
    }
}

impl Session for RawSession {
    fn receive(&self, datagram: Bytes) -> Result<(), TransportError> {
        if self.signals.is_closed() {
            return Err(TransportError::Closed(self.remote_addr));
        }
        match self.inbound_tx.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(addr = %self.remote_addr, "inbound queue full, dropping datagram");
            }
            Err(TrySendError::Closed(_)) => {
                return Err(TransportError::Closed(self.remote_addr));
            }
        }
        self.signals.complete();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.signals.is_closed() {
            tracing::debug!(addr = %self.remote_addr, "raw session closed");
        }
        self.signals.close();
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }

    fn client_guid(&self) -> i64 {
        self.client_guid
    }

    fn signals(&self) -> &SessionSignals {
        &self.signals
    }
}

/// A [`SessionFactory`] producing [`RawSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSessionFactory;

impl SessionFactory for RawSessionFactory {
    type Session = RawSession;

    fn create(
        &self,
        socket: Arc<UdpSocket>,
        remote_addr: SocketAddr,
        mtu: u16,
        client_guid: i64,
    ) -> RawSession {
        RawSession::new(socket, remote_addr, mtu, client_guid)
    }
}
