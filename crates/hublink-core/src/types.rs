//! Shared vocabulary types
//!
//! The connection lifecycle states and the generation counter that ties every
//! receiver-originated item to the connect that produced it.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Externally observable lifecycle state of the session.
///
/// Exactly one transition may be in flight at a time; operations arriving
/// while one of the transitional states is active are queued in FIFO order
/// and dispatched when the transition settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link. Initial state, and the terminal state of every close,
    /// failed connect, and externally signaled drop.
    Disconnected,
    /// A connect transition is in flight.
    Connecting,
    /// The link is established and data-plane operations execute directly.
    Connected,
    /// A disconnect transition is in flight.
    Disconnecting,
    /// A security-token update is in flight on a live link.
    UpdatingToken,
}

impl ConnectionState {
    /// True while a transition is in flight and new operations must queue.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Disconnecting
                | ConnectionState::UpdatingToken
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::UpdatingToken => "updating_token",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Connection Generation
// ----------------------------------------------------------------------------

/// Monotonic counter distinguishing one successful connect from the next.
///
/// Every sink handed to a receiver is minted for a specific generation;
/// items stamped with any other generation are discarded by the session
/// task, which silences receivers that have outlived their link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionGeneration(u64);

impl ConnectionGeneration {
    /// The generation before any connect has succeeded.
    pub const INITIAL: Self = ConnectionGeneration(0);

    pub fn next(self) -> Self {
        ConnectionGeneration(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitional_states() {
        assert!(!ConnectionState::Disconnected.is_transitional());
        assert!(!ConnectionState::Connected.is_transitional());
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Disconnecting.is_transitional());
        assert!(ConnectionState::UpdatingToken.is_transitional());
    }

    #[test]
    fn test_generations_advance_monotonically() {
        let first = ConnectionGeneration::INITIAL.next();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.value(), 2);
        assert_eq!(first.to_string(), "gen-1");
    }
}
