//! Connection lifecycle state.

/// Lifecycle of a WebSocket connection.
///
/// States only move forward: `Handshaking -> Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ConnectionState {
    /// Upgrade request received, response not yet written.
    #[default]
    Handshaking,
    /// Handshake complete; frames flow in both directions.
    Open,
    /// Socket shut down. Terminal.
    Closed,
}

impl ConnectionState {
    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `false` and leaves the state untouched for a backward or
    /// repeated transition.
    #[must_use = "a refused transition must be handled"]
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Returns `true` only for `Open`.
    #[must_use]
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Returns `true` for `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
