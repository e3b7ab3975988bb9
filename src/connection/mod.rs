//! Accepted WebSocket connections and their lifecycle.
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - upgrade request read, 101 response being written
//! 2. **Open** - registered with the event loop; frames flow
//! 3. **Closed** - socket shut down and removed from both registries

mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, Inbound, accept_handshake};
pub use state::ConnectionState;

/// Stable handle to a connection owned by the event loop.
///
/// A handle pairs the connection's arena slot with the generation it was
/// issued in. Slots are reused after removal; generations never are, so a
/// handle kept past its disconnect never resolves to a newer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
}

impl ConnectionId {
    pub(crate) const fn new(slot: usize, generation: u64) -> Self {
        Self { slot, generation }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}.{}", self.slot, self.generation)
    }
}
