//! Session handle abstraction for Rakgate.
//!
//! The listener negotiates a connection and then hands every further
//! datagram from that peer to a *session*: the reliable/ordered delivery
//! layer that turns datagrams into a byte stream. That layer lives
//! outside this workspace. This crate defines the narrow seam the listener
//! talks to it through:
//!
//! - [`SessionFactory`] — builds a session once the offline handshake
//!   has agreed on an MTU
//! - [`Session`] — receives raw datagrams, closes, reports its peer
//! - [`SessionSignals`] — the one-shot "handshake complete" and "closed"
//!   signals the listener waits on
//!
//! # Feature Flags
//!
//! - `raw` (default) — [`RawSession`], an unreliable pass-through session
//!   for demos and tests

mod error;
#[cfg(feature = "raw")]
mod raw;

pub use error::TransportError;
#[cfg(feature = "raw")]
pub use raw::{RawSession, RawSessionFactory};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// SessionSignals
// ---------------------------------------------------------------------------

/// The two one-shot signals every session exposes.
///
/// Both are [`CancellationToken`]s: once fired they stay fired, and any
/// number of tasks can wait on them. Cloning shares the same signals,
/// which is how background watchers outlive a borrow of the session.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    completed: CancellationToken,
    closed: CancellationToken,
}

impl SessionSignals {
    /// Creates a pair of unfired signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the "handshake complete" signal. Idempotent.
    pub fn complete(&self) {
        self.completed.cancel();
    }

    /// Fires the "closed" signal. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once [`complete`](Self::complete) has been called.
    pub fn is_complete(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the session-layer handshake completes.
    pub async fn completed(&self) {
        self.completed.cancelled().await;
    }

    /// Waits until the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

// ---------------------------------------------------------------------------
// Session / SessionFactory
// ---------------------------------------------------------------------------

/// An established per-peer session, as seen by the listener.
///
/// The listener only ever forwards datagrams in and closes sessions; the
/// rest of a session's API (sending, reading the stream) belongs to the
/// implementation and is used by whoever accepted it.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → sessions are shared as `Arc<Self>` between
///   the read loop, the accept caller and cleanup tasks.
/// - `close` returns a `Send` future so it can be awaited from spawned
///   tasks.
pub trait Session: Send + Sync + 'static {
    /// Feeds one raw datagram from the peer into the session.
    ///
    /// Called on the listener's read loop: implementations must not block
    /// and should hand heavy work to their own tasks.
    fn receive(&self, datagram: Bytes) -> Result<(), TransportError>;

    /// Closes the session and fires its closed signal.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The peer's address. Unique among live sessions.
    fn remote_addr(&self) -> SocketAddr;

    /// The MTU negotiated during the offline handshake.
    fn mtu(&self) -> u16;

    /// The GUID the peer reported in its second connection request.
    fn client_guid(&self) -> i64;

    /// The session's completion and closed signals.
    fn signals(&self) -> &SessionSignals;
}

/// Builds sessions for newly negotiated peers.
pub trait SessionFactory: Send + Sync + 'static {
    /// The session type produced by this factory.
    type Session: Session;

    /// Creates a session bound to the listener's socket.
    ///
    /// Called on the read loop right after the second connection reply
    /// was sent.
    fn create(
        &self,
        socket: Arc<UdpSocket>,
        remote_addr: SocketAddr,
        mtu: u16,
        client_guid: i64,
    ) -> Self::Session;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_signals_start_unfired() {
        let signals = SessionSignals::new();
        assert!(!signals.is_complete());
        assert!(!signals.is_closed());
    }

    #[test]
    fn test_signals_fire_independently_and_idempotently() {
        let signals = SessionSignals::new();

        signals.complete();
        signals.complete();

        assert!(signals.is_complete());
        assert!(!signals.is_closed(), "completion must not close");
    }

    #[tokio::test]
    async fn test_signals_clone_shares_state() {
        let signals = SessionSignals::new();
        let watcher = signals.clone();

        let waiter = tokio::spawn(async move { watcher.closed().await });
        signals.close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve after close()")
            .expect("task should not panic");
    }
}
