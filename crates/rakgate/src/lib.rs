//! # Rakgate
//!
//! Server-side RakNet connection listener.
//!
//! Rakgate owns a UDP socket, answers unconnected pings, negotiates the
//! protocol version and MTU with connecting clients, and hands each
//! negotiated peer to a session implementation of your choice. Sessions
//! that finish their own handshake come out of [`Listener::accept`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ rakgate (this crate)         │  Listener, dispatcher, accept, pong
//! ├──────────────────────────────┤
//! │ rakgate-session              │  SessionTable (address → session)
//! ├──────────────────────────────┤
//! │ rakgate-transport            │  Session / SessionFactory seam
//! ├──────────────────────────────┤
//! │ rakgate-protocol             │  offline message layouts
//! └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rakgate::prelude::*;
//!
//! # async fn run() -> Result<(), RakgateError> {
//! let listener = rakgate::listen("0.0.0.0:19132").await?;
//! listener.set_pong_payload("MCPE;My Server;390;1.14.60;0;10")?;
//!
//! while let Ok(session) = listener.accept().await {
//!     tokio::spawn(async move {
//!         while let Ok(Some(datagram)) = session.recv().await {
//!             let _ = session.send(&datagram).await;
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod accept;
mod config;
mod dispatcher;
mod error;
mod listener;
mod pong;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::ListenerConfig;
pub use dispatcher::ErrorSink;
pub use error::{DispatchError, ListenerError, PingError, RakgateError};
pub use listener::{Listener, ListenerBuilder};
pub use pong::{ping, relay_payload};

/// The offline wire format, for clients and tools.
pub use rakgate_protocol as protocol;

/// Binds a listener on `addr` with the default configuration.
///
/// Shorthand for [`Listener::bind`].
pub async fn listen(addr: &str) -> Result<Listener, ListenerError> {
    Listener::bind(addr).await
}

/// Convenience re-exports for common usage.
///
/// ```rust
/// use rakgate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        DispatchError, Listener, ListenerBuilder, ListenerConfig,
        ListenerError, RakgateError,
    };
    pub use rakgate_transport::{
        RawSession, RawSessionFactory, Session, SessionFactory,
        SessionSignals, TransportError,
    };
}
