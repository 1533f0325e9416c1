use std::net::SocketAddr;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session was closed.
    #[error("session with {0} is closed")]
    Closed(SocketAddr),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The datagram does not fit the MTU negotiated during the handshake.
    #[error("datagram of {len} bytes exceeds the negotiated MTU of {mtu}")]
    Oversized {
        /// Size of the rejected datagram.
        len: usize,
        /// The session's MTU.
        mtu: u16,
    },
}
