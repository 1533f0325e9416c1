//! Per-peer session tracking for Rakgate.
//!
//! This crate answers one question for the listener: "does this address
//! already have a session?" The [`SessionTable`] is the single source of
//! truth for it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Listener (above)  ← registers sessions, routes connected datagrams
//!     ↕
//! Session Table (this crate)  ← address → session handle
//!     ↕
//! Transport (below)  ← provides the Session trait
//! ```

mod error;
mod table;

pub use error::SessionError;
pub use table::SessionTable;
