//! The accept pipeline: hands negotiated sessions to the application once
//! their session-layer handshake completes.
//!
//! A session is queued the moment the second connection reply goes out,
//! but the client may vanish before the session layer finishes its own
//! handshake. Each candidate therefore gets a bounded wait:
//!
//! ```text
//! queue.recv() ──→ race ┬─ listener shut down ─→ Err(Closed)
//!                       ├─ handshake complete ─→ watch for close, Ok(session)
//!                       └─ timeout ────────────→ close, unregister, next candidate
//! ```

use std::sync::Arc;
use std::time::Duration;

use rakgate_transport::Session;
use tokio::sync::{mpsc, Mutex};

use crate::listener::Shared;
use crate::ListenerError;

/// Receiving end of the queue the read loop fills.
pub(crate) struct AcceptQueue<S> {
    incoming: Mutex<mpsc::Receiver<Arc<S>>>,
    handshake_timeout: Duration,
}

impl<S: Session> AcceptQueue<S> {
    pub(crate) fn new(
        incoming: mpsc::Receiver<Arc<S>>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            incoming: Mutex::new(incoming),
            handshake_timeout,
        }
    }

    /// Waits for the next session that completes its handshake.
    ///
    /// Candidates that time out are closed and removed from the table, so
    /// each one is returned at most once. Concurrent callers take turns
    /// pulling from the queue but wait on their candidates independently.
    ///
    /// # Errors
    /// Returns [`ListenerError::Closed`] once the listener shuts down, or
    /// when the read loop has stopped and the queue is drained.
    pub(crate) async fn next(
        &self,
        shared: &Arc<Shared<S>>,
    ) -> Result<Arc<S>, ListenerError> {
        loop {
            let candidate = {
                let mut incoming = tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => return Err(ListenerError::Closed),
                    incoming = self.incoming.lock() => incoming,
                };
                tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => return Err(ListenerError::Closed),
                    next = incoming.recv() => next.ok_or(ListenerError::Closed)?,
                }
            };

            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => return Err(ListenerError::Closed),
                _ = candidate.signals().completed() => {
                    spawn_eviction(shared, &candidate);
                    tracing::debug!(addr = %candidate.remote_addr(), "session accepted");
                    return Ok(candidate);
                }
                _ = tokio::time::sleep(self.handshake_timeout) => {
                    let addr = candidate.remote_addr();
                    tracing::debug!(
                        %addr,
                        timeout = ?self.handshake_timeout,
                        "session handshake timed out, dropping candidate"
                    );
                    if let Err(e) = candidate.close().await {
                        tracing::debug!(%addr, error = %e, "error closing timed out session");
                    }
                    shared.sessions.remove_if_same(&candidate);
                }
            }
        }
    }
}

impl<S> AcceptQueue<S> {
    /// Closes the queue and drops every session still waiting in it.
    ///
    /// Queued sessions may hold the listener's socket; they must not
    /// outlive a closed listener. Returns how many were dropped.
    pub(crate) async fn drain(&self) -> usize {
        let mut incoming = self.incoming.lock().await;
        incoming.close();
        let mut dropped = 0;
        while incoming.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Removes `session` from the table once it closes.
///
/// One task per accepted session; it lives exactly as long as the session
/// stays open.
fn spawn_eviction<S: Session>(shared: &Arc<Shared<S>>, session: &Arc<S>) {
    let shared = Arc::clone(shared);
    let session = Arc::clone(session);
    tokio::spawn(async move {
        session.signals().closed().await;
        shared.sessions.remove_if_same(&session);
    });
}
