//! `Listener` builder and lifecycle.
//!
//! This is the entry point of Rakgate. It ties the layers together:
//! socket → dispatcher (protocol) → session table → accept queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use rakgate_protocol::PongFraming;
use rakgate_session::SessionTable;
use rakgate_transport::{RawSessionFactory, SessionFactory};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accept::AcceptQueue;
use crate::dispatcher::{Dispatcher, ErrorSink};
use crate::pong::{self, PongData};
use crate::{DispatchError, ListenerConfig, ListenerError};

/// State shared by the read loop, `accept()` callers and background
/// tasks.
pub(crate) struct Shared<S> {
    /// Instance identifier: random, non-negative, fixed for the
    /// listener's lifetime.
    pub(crate) id: i64,
    pub(crate) protocol_version: u8,
    pub(crate) framing: PongFraming,
    pub(crate) pong: PongData,
    pub(crate) sessions: SessionTable<S>,
    /// Fired once, on close or drop.
    pub(crate) shutdown: CancellationToken,
    pub(crate) error_sink: Option<ErrorSink>,
}

// ---------------------------------------------------------------------------
// ListenerBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a [`Listener`].
///
/// # Example
///
/// ```rust,no_run
/// use rakgate::prelude::*;
///
/// # async fn run() -> Result<(), RakgateError> {
/// let listener = Listener::builder()
///     .bind("0.0.0.0:19132")
///     .protocol_version(10)
///     .error_sink(|addr, err| eprintln!("{addr}: {err}"))
///     .listen()
///     .await?;
/// listener.set_pong_payload("MCPE;Rakgate;390;1.14.60;0;10")?;
/// # Ok(())
/// # }
/// ```
pub struct ListenerBuilder {
    bind_addr: String,
    config: ListenerConfig,
    error_sink: Option<ErrorSink>,
}

impl ListenerBuilder {
    /// Creates a builder with default settings, bound to the standard
    /// RakNet port on all interfaces.
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:19132".to_string(),
            config: ListenerConfig::default(),
            error_sink: None,
        }
    }

    /// Sets the address to bind the listener to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the only protocol version clients may connect with.
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Installs a callback that sees every per-datagram error.
    ///
    /// Errors are logged either way; the sink is for callers who want to
    /// count or surface them.
    pub fn error_sink<E>(mut self, sink: E) -> Self
    where
        E: Fn(SocketAddr, &DispatchError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Binds and starts a listener whose sessions are [`RawSession`]s.
    ///
    /// [`RawSession`]: rakgate_transport::RawSession
    pub async fn listen(self) -> Result<Listener, ListenerError> {
        self.listen_with(RawSessionFactory).await
    }

    /// Binds and starts a listener that builds sessions with `factory`.
    ///
    /// # Errors
    /// Returns [`ListenerError::Bind`] if the UDP socket cannot be bound.
    pub async fn listen_with<F: SessionFactory>(
        self,
        factory: F,
    ) -> Result<Listener<F>, ListenerError> {
        let config = self.config.validated();

        let socket = UdpSocket::bind(self.bind_addr.as_str())
            .await
            .map_err(ListenerError::Bind)?;
        let local_addr = socket.local_addr().map_err(ListenerError::Bind)?;
        let socket = Arc::new(socket);

        let id = rand::rng().random::<i64>() & i64::MAX;
        let shared = Arc::new(Shared {
            id,
            protocol_version: config.protocol_version,
            framing: config.pong_framing(),
            pong: PongData::new(),
            sessions: SessionTable::new(),
            shutdown: CancellationToken::new(),
            error_sink: self.error_sink,
        });

        let (accepted_tx, accepted_rx) =
            mpsc::channel(config.accept_queue_capacity);
        let dispatcher =
            Dispatcher::new(socket, factory, Arc::clone(&shared), accepted_tx);
        let read_loop = tokio::spawn(dispatcher.run());

        tracing::info!(
            %local_addr,
            id,
            protocol = config.protocol_version,
            "listener started"
        );

        Ok(Listener {
            accept: AcceptQueue::new(accepted_rx, config.handshake_timeout),
            shared,
            local_addr,
            config,
            read_loop: StdMutex::new(Some(read_loop)),
            hijackers: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A running RakNet listener.
///
/// Call [`accept()`](Self::accept) to receive sessions and
/// [`close()`](Self::close) to shut down. Dropping a listener without
/// closing it stops the read loop and background tasks but leaves
/// sessions open.
pub struct Listener<F: SessionFactory = RawSessionFactory> {
    shared: Arc<Shared<F::Session>>,
    accept: AcceptQueue<F::Session>,
    local_addr: SocketAddr,
    config: ListenerConfig,
    read_loop: StdMutex<Option<JoinHandle<()>>>,
    hijackers: StdMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Listener {
    /// Creates a new builder.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Binds a listener with the default configuration.
    pub async fn bind(addr: &str) -> Result<Self, ListenerError> {
        ListenerBuilder::new().bind(addr).listen().await
    }
}

impl<F: SessionFactory> Listener<F> {
    /// Waits for the next session that has completed its handshake.
    ///
    /// # Errors
    /// Returns [`ListenerError::Closed`] once the listener is closed.
    pub async fn accept(&self) -> Result<Arc<F::Session>, ListenerError> {
        self.accept.next(&self.shared).await
    }

    /// Shuts the listener down.
    ///
    /// Shutdown runs in a fixed order:
    ///
    /// ```text
    /// cancel ─→ join read loop ─→ join hijack tasks ─→ drain accept queue ─→ close_all
    /// ```
    ///
    /// Once the read loop has been joined no session can be created, so
    /// every registered session gets a close call even when one fails.
    /// Sessions still waiting in the accept queue are dropped, along with
    /// their handle on the socket; sessions held by the application keep
    /// theirs until they are dropped. Calling `close` again is a no-op.
    ///
    /// # Errors
    /// - [`ListenerError::ReadLoop`] if the read loop panicked
    /// - [`ListenerError::Session`] for the first session that failed to
    ///   close
    pub async fn close(&self) -> Result<(), ListenerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(local_addr = %self.local_addr, "closing listener");

        self.shared.shutdown.cancel();

        let read_loop = with_lock(&self.read_loop, Option::take);
        let joined = match read_loop {
            Some(handle) => handle.await.map_err(ListenerError::ReadLoop),
            None => Ok(()),
        };

        let hijackers = with_lock(&self.hijackers, std::mem::take);
        for handle in hijackers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "pong hijack task failed");
            }
        }

        let dropped = self.accept.drain().await;
        if dropped > 0 {
            tracing::debug!(dropped, "dropped sessions waiting in the accept queue");
        }

        let mut sessions = Ok(());
        if !self.shared.sessions.is_empty() {
            tracing::debug!(count = self.shared.sessions.len(), "closing sessions");
            sessions = self.shared.sessions.close_all().await;
            self.shared.sessions.clear();
        }

        joined?;
        Ok(sessions?)
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the listener's instance identifier.
    pub fn id(&self) -> i64 {
        self.shared.id
    }

    /// Returns the protocol version clients must connect with.
    pub fn protocol_version(&self) -> u8 {
        self.shared.protocol_version
    }

    /// Returns the configuration the listener runs with, after
    /// validation.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Replaces the payload sent in answer to unconnected pings.
    ///
    /// # Errors
    /// Returns [`ListenerError::PongPayloadTooLarge`] if the payload is
    /// longer than 32767 bytes. This is a programming error; the previous
    /// payload stays in place.
    pub fn set_pong_payload(
        &self,
        payload: impl Into<Bytes>,
    ) -> Result<(), ListenerError> {
        self.shared
            .pong
            .store(payload.into())
            .inspect_err(|e| tracing::error!(error = %e, "pong payload rejected"))
    }

    /// Returns the current pong payload.
    pub fn pong_payload(&self) -> Bytes {
        self.shared.pong.load()
    }

    /// Returns a receiver that is notified every time the pong payload
    /// changes, including refreshes made by hijack mode.
    pub fn pong_updates(&self) -> watch::Receiver<Bytes> {
        self.shared.pong.subscribe()
    }

    /// Starts mirroring another server's pong payload.
    ///
    /// `address` is resolved once. From then on the listener pings it
    /// every [`hijack_interval`](ListenerConfig::hijack_interval) and
    /// relays its answer (see [`relay_payload`](crate::relay_payload))
    /// until the listener is closed.
    ///
    /// # Errors
    /// - [`ListenerError::Resolve`] if `address` does not resolve
    /// - [`ListenerError::Closed`] if the listener is already closed
    pub async fn hijack_pong(&self, address: &str) -> Result<(), ListenerError> {
        if self.is_closed() {
            return Err(ListenerError::Closed);
        }
        let resolve_error = |source| ListenerError::Resolve {
            addr: address.to_string(),
            source,
        };
        let upstream = tokio::net::lookup_host(address)
            .await
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| {
                resolve_error(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })?;

        let hijacker = pong::spawn_hijack(
            Arc::clone(&self.shared),
            upstream,
            self.config.hijack_interval,
        );
        with_lock(&self.hijackers, |handles| handles.push(hijacker));
        tracing::info!(%upstream, "hijacking pong data");
        Ok(())
    }

    /// Returns the number of registered sessions, accepted or pending.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Returns `true` once the listener has shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

/// Runs `f` on the guarded value, ignoring poisoning.
fn with_lock<T, R>(lock: &StdMutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    match lock.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

impl<F: SessionFactory> Drop for Listener<F> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
