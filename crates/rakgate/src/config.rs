//! Listener configuration.

use std::time::Duration;

use rakgate_protocol::{PongFraming, MINECRAFT_PROTOCOL};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for a [`Listener`](crate::Listener).
///
/// Every field has a default, so a config can be built with
/// `ListenerConfig::default()` and only the interesting fields
/// overridden. `#[serde(default)]` lets a config file do the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// The only RakNet protocol version clients may connect with.
    /// Others get an incompatible-protocol reply.
    pub protocol_version: u8,

    /// How many negotiated sessions may wait for [`accept`] before the
    /// read loop stops taking new ones.
    ///
    /// [`accept`]: crate::Listener::accept
    pub accept_queue_capacity: usize,

    /// How long an accepted candidate has to finish the session-layer
    /// handshake before it is closed and skipped.
    pub handshake_timeout: Duration,

    /// How often hijack mode refreshes the pong payload. Also bounds how
    /// long each upstream ping waits for its pong.
    pub hijack_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            protocol_version: MINECRAFT_PROTOCOL,
            accept_queue_capacity: Self::DEFAULT_ACCEPT_QUEUE_CAPACITY,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            hijack_interval: Self::DEFAULT_HIJACK_INTERVAL,
        }
    }
}

impl ListenerConfig {
    /// Default accept queue size.
    pub const DEFAULT_ACCEPT_QUEUE_CAPACITY: usize = 128;
    /// Default session-layer handshake bound.
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default hijack refresh period.
    pub const DEFAULT_HIJACK_INTERVAL: Duration = Duration::from_secs(1);

    /// How pong payloads are framed for this protocol version.
    ///
    /// Only the Minecraft protocol length-prefixes its payload.
    pub fn pong_framing(&self) -> PongFraming {
        PongFraming::for_protocol(self.protocol_version)
    }

    /// Fixes values that would make the listener unusable.
    ///
    /// Called automatically when a listener is built. Rules:
    /// - `accept_queue_capacity` of 0 becomes 1 (a channel needs room for
    ///   at least one session).
    /// - Zero durations fall back to their defaults.
    pub fn validated(mut self) -> Self {
        if self.accept_queue_capacity == 0 {
            warn!("accept_queue_capacity is 0, using 1");
            self.accept_queue_capacity = 1;
        }
        if self.handshake_timeout.is_zero() {
            warn!(
                default = ?Self::DEFAULT_HANDSHAKE_TIMEOUT,
                "handshake_timeout is 0, using default"
            );
            self.handshake_timeout = Self::DEFAULT_HANDSHAKE_TIMEOUT;
        }
        if self.hijack_interval.is_zero() {
            warn!(
                default = ?Self::DEFAULT_HIJACK_INTERVAL,
                "hijack_interval is 0, using default"
            );
            self.hijack_interval = Self::DEFAULT_HIJACK_INTERVAL;
        }
        self
    }
}
