//! The session table: every live session, keyed by peer address.
//!
//! # Concurrency note
//!
//! Unlike a single-owner registry, this table is touched from several
//! tasks at once: the listener's read loop inserts and looks up, accept
//! timeouts and post-accept watchers remove, and shutdown iterates.
//! `DashMap` shards its locks, so none of those callers needs an outer
//! mutex and lookups for different peers rarely contend.
//!
//! Handles are returned as cloned `Arc`s, never as map guards: holding a
//! `DashMap` guard across an `.await` (or while touching the same shard
//! again) deadlocks.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use rakgate_transport::Session;

use crate::SessionError;

/// Maps each peer address to its session handle.
///
/// ## Lifecycle of an entry
///
/// ```text
/// insert() ──→ get() (every datagram) ──→ remove_if_same() (after close)
///                                              ▲
///                     close_all() + clear() ───┘ (listener shutdown)
/// ```
pub struct SessionTable<S> {
    sessions: DashMap<SocketAddr, Arc<S>>,
}

impl<S: Session> SessionTable<S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session under its remote address.
    ///
    /// Last write wins: if the address already had a session, it is
    /// replaced (not closed) and returned so the caller can decide what
    /// to do with it.
    pub fn insert(&self, session: Arc<S>) -> Option<Arc<S>> {
        let addr = session.remote_addr();
        let previous = self.sessions.insert(addr, session);
        if previous.is_some() {
            tracing::warn!(%addr, "session replaced by a newer one from the same address");
        } else {
            tracing::debug!(%addr, "session registered");
        }
        previous
    }

    /// Looks up the session for `addr`.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<S>> {
        self.sessions.get(addr).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `session`'s entry only if the table still maps its address
    /// to this very handle.
    ///
    /// A stale cleanup task must not evict a newer session that took over
    /// the same address. Returns `true` if the entry was removed.
    pub fn remove_if_same(&self, session: &Arc<S>) -> bool {
        let addr = session.remote_addr();
        let removed = self
            .sessions
            .remove_if(&addr, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            tracing::debug!(%addr, "session removed");
        }
        removed
    }

    /// Returns every registered session.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Closes every registered session.
    ///
    /// Every session gets a close call even if an earlier one fails. The
    /// first failure is returned; later ones are only logged.
    ///
    /// # Errors
    /// Returns [`SessionError::CloseFailed`] for the first session that
    /// failed to close.
    pub async fn close_all(&self) -> Result<(), SessionError> {
        let mut first_error = None;
        for session in self.snapshot() {
            let addr = session.remote_addr();
            if let Err(source) = session.close().await {
                if first_error.is_none() {
                    first_error = Some(SessionError::CloseFailed { addr, source });
                } else {
                    tracing::warn!(%addr, error = %source, "error closing session");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drops every entry without closing anything.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S: Session> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionTable`.
    //!
    //! Naming convention: `test_{function}_{scenario}_{expected}`.
    //! Sessions are replaced by a small in-memory double that counts
    //! close calls and can be told to fail.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use rakgate_transport::{SessionSignals, TransportError};

    use super::*;

    // -- Helpers ----------------------------------------------------------

    struct FakeSession {
        addr: SocketAddr,
        fail_close: bool,
        closes: AtomicUsize,
        signals: SessionSignals,
    }

    impl Session for FakeSession {
        fn receive(&self, _datagram: Bytes) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.signals.close();
            if self.fail_close {
                return Err(TransportError::Closed(self.addr));
            }
            Ok(())
        }

        fn remote_addr(&self) -> SocketAddr {
            self.addr
        }

        fn mtu(&self) -> u16 {
            1400
        }

        fn client_guid(&self) -> i64 {
            0
        }

        fn signals(&self) -> &SessionSignals {
            &self.signals
        }
    }

    fn session(port: u16) -> Arc<FakeSession> {
        fake(port, false)
    }

    fn fake(port: u16, fail_close: bool) -> Arc<FakeSession> {
        Arc::new(FakeSession {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            fail_close,
            closes: AtomicUsize::new(0),
            signals: SessionSignals::new(),
        })
    }

    // =====================================================================
    // insert() / get()
    // =====================================================================

    #[test]
    fn test_insert_then_get_returns_same_handle() {
        let table = SessionTable::new();
        let s = session(1000);

        assert!(table.insert(Arc::clone(&s)).is_none());

        let found = table.get(&s.addr).expect("should be registered");
        assert!(Arc::ptr_eq(&found, &s));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_same_address_last_write_wins() {
        let table = SessionTable::new();
        let first = session(1000);
        let second = session(1000);

        table.insert(Arc::clone(&first));
        let displaced = table.insert(Arc::clone(&second));

        assert!(Arc::ptr_eq(&displaced.expect("should displace"), &first));
        assert!(Arc::ptr_eq(&table.get(&first.addr).unwrap(), &second));
        assert_eq!(table.len(), 1);
        assert_eq!(
            first.closes.load(Ordering::SeqCst),
            0,
            "displaced session is not closed"
        );
    }

    #[test]
    fn test_get_unknown_address_returns_none() {
        let table: SessionTable<FakeSession> = SessionTable::new();
        assert!(table.get(&SocketAddr::from(([10, 0, 0, 1], 1))).is_none());
        assert!(table.is_empty());
    }

    // =====================================================================
    // remove_if_same()
    // =====================================================================

    #[test]
    fn test_remove_if_same_skips_newer_session() {
        let table = SessionTable::new();
        let stale = session(1000);
        let fresh = session(1000);
        table.insert(Arc::clone(&stale));
        table.insert(Arc::clone(&fresh));

        assert!(!table.remove_if_same(&stale), "stale handle must not evict");
        assert!(Arc::ptr_eq(&table.get(&fresh.addr).unwrap(), &fresh));

        assert!(table.remove_if_same(&fresh));
        assert!(table.is_empty());
    }

    // =====================================================================
    // close_all()
    // =====================================================================

    #[tokio::test]
    async fn test_close_all_closes_every_session() {
        let table = SessionTable::new();
        let sessions: Vec<_> = (1..=3).map(session).collect();
        for s in &sessions {
            table.insert(Arc::clone(s));
        }

        table.close_all().await.expect("should succeed");

        for s in &sessions {
            assert_eq!(s.closes.load(Ordering::SeqCst), 1);
            assert!(s.signals.is_closed());
        }
        // Closing does not remove entries; clear() does.
        assert_eq!(table.len(), 3);
        table.clear();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_keeps_going_after_failure() {
        let table = SessionTable::new();
        let bad_a = fake(1, true);
        let good = fake(2, false);
        let bad_b = fake(3, true);
        table.insert(Arc::clone(&bad_a));
        table.insert(Arc::clone(&good));
        table.insert(Arc::clone(&bad_b));

        let result = table.close_all().await;

        match result {
            Err(SessionError::CloseFailed { addr, .. }) => {
                assert!(addr == bad_a.addr || addr == bad_b.addr);
            }
            other => panic!("expected CloseFailed, got {other:?}"),
        }
        for s in [&bad_a, &good, &bad_b] {
            assert_eq!(
                s.closes.load(Ordering::SeqCst),
                1,
                "every session must be asked to close"
            );
        }
    }
}
