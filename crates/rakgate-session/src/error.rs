//! Error types for the session table.

use std::net::SocketAddr;

use rakgate_transport::TransportError;

/// Errors that can occur while managing the session table.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Closing a registered session failed.
    ///
    /// When several sessions fail to close, only the first is reported
    /// this way; the rest are logged.
    #[error("error closing session {addr}: {source}")]
    CloseFailed {
        /// The peer whose session failed to close.
        addr: SocketAddr,
        /// Why it failed.
        #[source]
        source: TransportError,
    },
}
