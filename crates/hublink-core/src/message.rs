//! Message model
//!
//! Outbound events, inbound deliveries with their settlement tokens, and
//! direct method invocations. Payloads are opaque byte vectors; their
//! encoding is a contract between the application and the hub.

use crate::errors::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Outbound Messages
// ----------------------------------------------------------------------------

/// An application event sent device-to-hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Unique id, assigned at construction.
    pub message_id: Uuid,
    /// Correlates responses in request/response exchanges.
    pub correlation_id: Option<String>,
    /// MIME type of the payload, when the application declares one.
    pub content_type: Option<String>,
    /// Application-defined properties carried beside the payload.
    pub properties: HashMap<String, String>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Message {
            payload: payload.into(),
            message_id: Uuid::new_v4(),
            correlation_id: None,
            content_type: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

/// A hub-to-device message plus the transport-issued settlement token.
///
/// `Clone` so the receiver bridge can hand an independent copy to every
/// subscribed listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message: Message,
    /// Issued by the transport per delivery; required for settlement.
    pub lock_token: String,
}

impl InboundMessage {
    pub fn new(message: Message, lock_token: impl Into<String>) -> Self {
        InboundMessage {
            message,
            lock_token: lock_token.into(),
        }
    }
}

/// Settlement outcomes for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    /// Remove the message from the hub queue.
    Complete,
    /// Dead-letter the message; it will not be redelivered.
    Reject,
    /// Return the message to the hub queue for redelivery.
    Abandon,
}

impl Disposition {
    pub fn name(&self) -> &'static str {
        match self {
            Disposition::Complete => "complete",
            Disposition::Reject => "reject",
            Disposition::Abandon => "abandon",
        }
    }

    /// The public operation this disposition is gated by.
    pub fn operation(&self) -> Operation {
        match self {
            Disposition::Complete => Operation::Complete,
            Disposition::Reject => Operation::Reject,
            Disposition::Abandon => Operation::Abandon,
        }
    }
}

// ----------------------------------------------------------------------------
// Method Invocations
// ----------------------------------------------------------------------------

/// A direct method call routed to a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInvocation {
    /// Name the caller invoked; matches a registered handler name.
    pub name: String,
    /// Transport-issued id for this invocation.
    pub request_id: String,
    /// Opaque request payload.
    pub payload: Vec<u8>,
}

impl MethodInvocation {
    pub fn new(
        name: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        MethodInvocation {
            name: name.into(),
            request_id: request_id.into(),
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_get_unique_ids() {
        let a = Message::new(b"one".to_vec());
        let b = Message::new(b"two".to_vec());
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_builder_setters_accumulate() {
        let msg = Message::new(b"{}".to_vec())
            .with_content_type("application/json")
            .with_correlation_id("req-7")
            .with_property("origin", "sensor-3");
        assert_eq!(msg.content_type.as_deref(), Some("application/json"));
        assert_eq!(msg.correlation_id.as_deref(), Some("req-7"));
        assert_eq!(msg.properties.get("origin").map(String::as_str), Some("sensor-3"));
    }

    #[test]
    fn test_dispositions_map_to_operations() {
        assert_eq!(Disposition::Complete.operation(), Operation::Complete);
        assert_eq!(Disposition::Reject.operation(), Operation::Reject);
        assert_eq!(Disposition::Abandon.operation(), Operation::Abandon);
        assert_eq!(Disposition::Abandon.name(), "abandon");
    }
}
