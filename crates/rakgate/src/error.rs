//! Error types for the listener, plus the unified [`RakgateError`].

use std::net::SocketAddr;
use std::time::Duration;

use rakgate_protocol::ProtocolError;
use rakgate_session::SessionError;
use rakgate_transport::TransportError;

/// Errors returned by [`Listener`](crate::Listener) operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The UDP socket could not be bound.
    #[error("error creating UDP listener: {0}")]
    Bind(#[source] std::io::Error),

    /// A hijack target could not be resolved to a socket address.
    #[error("error resolving UDP address {addr}: {source}")]
    Resolve {
        /// The address as given.
        addr: String,
        /// Why resolution failed.
        #[source]
        source: std::io::Error,
    },

    /// The listener is closed; no more sessions will be accepted.
    #[error("error accepting connection: listener closed")]
    Closed,

    /// A pong payload longer than a signed 16-bit length can describe.
    ///
    /// This is a programming error, not a runtime condition: payloads are
    /// set by the operator, never by peers.
    #[error("pong payload must not be longer than {max} bytes, got {len}")]
    PongPayloadTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// [`MAX_PONG_PAYLOAD`](rakgate_protocol::MAX_PONG_PAYLOAD).
        max: usize,
    },

    /// Closing the registered sessions failed during shutdown.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The read loop task panicked.
    #[error("read loop failed: {0}")]
    ReadLoop(#[source] tokio::task::JoinError),
}

/// A problem with one datagram.
///
/// None of these stop the listener: they are logged (and passed to the
/// error sink, if one is installed) and the read loop moves on.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// An offline message with a known ID did not decode.
    #[error("error decoding offline message: {0}")]
    Decode(#[from] ProtocolError),

    /// An ID that is neither an offline request nor a session datagram,
    /// from a peer without a session.
    #[error("unknown packet received ({id:#04x}, {len} bytes)")]
    UnknownPacket {
        /// The leading byte.
        id: u8,
        /// Datagram size.
        len: usize,
    },

    /// The client asked for a protocol version the listener does not
    /// speak. It has already been told so.
    #[error("incompatible protocol version {client} (listener protocol = {server})")]
    IncompatibleProtocol {
        /// The version the client requested.
        client: u8,
        /// The version the listener accepts.
        server: u8,
    },

    /// Writing a reply failed. Only this peer is affected.
    #[error("error sending {packet}: {source}")]
    Send {
        /// Which reply was being sent.
        packet: &'static str,
        /// The socket error.
        #[source]
        source: std::io::Error,
    },

    /// The peer's session refused a datagram.
    #[error("session rejected datagram: {0}")]
    Session(#[from] TransportError),

    /// Nobody is left to accept sessions.
    #[error("accept queue closed")]
    QueueClosed,
}

impl DispatchError {
    /// Returns `true` for outcomes that are part of normal negotiation
    /// rather than faults.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::IncompatibleProtocol { .. })
    }
}

/// Errors from a one-off unconnected ping.
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    /// Socket setup, send or receive failed.
    #[error("ping i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// No pong arrived in time.
    #[error("no pong from {addr} within {timeout:?}")]
    Timeout {
        /// The pinged address.
        addr: SocketAddr,
        /// How long we waited.
        timeout: Duration,
    },

    /// The reply was not a well-formed pong.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `rakgate` crate you can deal with this single error
/// type instead of importing errors from each sub-crate; `?` converts
/// them automatically.
#[derive(Debug, thiserror::Error)]
pub enum RakgateError {
    /// A listener lifecycle error (bind, accept, close, config).
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// A per-datagram error.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An unconnected ping failed.
    #[error(transparent)]
    Ping(#[from] PingError),

    /// A wire format error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (send, receive, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A session table error.
    #[error(transparent)]
    Session(#[from] SessionError),
}
