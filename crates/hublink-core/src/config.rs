//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Sizing for the client's application-facing channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacity of the client event broadcast channel. Events are
    /// transient notifications; a slow subscriber lags rather than
    /// applying backpressure to the session task.
    pub client_event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            client_event_capacity: 64, // lifecycle events are rare; 64 absorbs bursts
        }
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Top-level configuration for a device client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Interval between proactive token renewals. Armed only for
    /// credentials that can mint their own tokens.
    pub token_renewal_interval: Duration,
    /// Channel sizing.
    pub channels: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            token_renewal_interval: Duration::from_secs(45 * 60), // well inside the 1h token TTL
            channels: ChannelConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for tests: renewals fire quickly, buffers stay small.
    pub fn testing() -> Self {
        ClientConfig {
            token_renewal_interval: Duration::from_millis(50),
            channels: ChannelConfig {
                client_event_capacity: 16,
            },
        }
    }
}
