//! Transport contract
//!
//! Transports are capability-polymorphic: a transport implements the subset
//! of operations it supports and advertises that subset through
//! [`TransportCapabilities`]. The client gates every operation against the
//! descriptor before queuing or connecting, so an unsupported operation
//! fails immediately and a supported one can rely on the method being
//! overridden. Optional operations have default bodies here: trivial
//! success for the lifecycle hooks, `OperationUnsupported` for data-plane
//! operations.
//!
//! Inbound traffic flows through a [`Receiver`], acquired fresh on every
//! successful connect. Receivers push into generation-stamped sinks; the
//! session task drops anything stamped with a generation other than the
//! current one, which is what silences a receiver that outlived its link.

use crate::errors::{Operation, TransportError, TransportResult};
use crate::message::{InboundMessage, Message, MethodInvocation};
use crate::security::SecurityToken;
use crate::types::ConnectionGeneration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// What a transport can do.
///
/// Snapshotted once at client construction. A `false` entry makes the
/// matching operation fail with `NotImplemented` before any queuing
/// decision or connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    pub send_event: bool,
    pub send_event_batch: bool,
    pub complete: bool,
    pub reject: bool,
    pub abandon: bool,
    pub update_token: bool,
    pub receive_messages: bool,
    pub device_methods: bool,
    pub set_options: bool,
}

impl TransportCapabilities {
    /// Every operation supported.
    pub fn full() -> Self {
        TransportCapabilities {
            send_event: true,
            send_event_batch: true,
            complete: true,
            reject: true,
            abandon: true,
            update_token: true,
            receive_messages: true,
            device_methods: true,
            set_options: true,
        }
    }

    /// Outbound events only: no receiver, no settlement.
    pub fn send_only() -> Self {
        TransportCapabilities {
            send_event: true,
            send_event_batch: false,
            complete: false,
            reject: false,
            abandon: false,
            update_token: true,
            receive_messages: false,
            device_methods: false,
            set_options: true,
        }
    }

    /// Whether the named public operation is supported. Lifecycle
    /// operations are always supported.
    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Open | Operation::Close => true,
            Operation::SendEvent => self.send_event,
            Operation::SendEventBatch => self.send_event_batch,
            Operation::Complete => self.complete,
            Operation::Reject => self.reject,
            Operation::Abandon => self.abandon,
            Operation::UpdateToken => self.update_token,
            Operation::RegisterMethod => self.device_methods,
            Operation::SubscribeMessages => self.receive_messages,
            Operation::SetOptions => self.set_options,
        }
    }

    /// True when a connect must acquire a receiver.
    pub fn needs_receiver(&self) -> bool {
        self.receive_messages || self.device_methods
    }
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        TransportCapabilities::full()
    }
}

// ----------------------------------------------------------------------------
// Transport Options
// ----------------------------------------------------------------------------

/// Tuning passed through to the transport via [`Transport::set_options`].
/// The client never interprets these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Keep-alive interval override, when the transport honors one.
    pub keep_alive: Option<Duration>,
    /// Per-operation timeout override.
    pub operation_timeout: Option<Duration>,
    /// Trusted CA bundle in PEM form.
    pub ca_certificate: Option<String>,
    /// Transport-specific knobs, forwarded untouched.
    pub custom: serde_json::Map<String, serde_json::Value>,
}

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Out-of-band link notifications published by a transport.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The link dropped outside any client-initiated transition.
    Dropped { reason: String },
}

/// What a transport did with a freshly applied security token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUpdateOutcome {
    /// The token took effect on the live link.
    Applied,
    /// The link must be re-established for the token to apply.
    ReconnectRequired,
}

// ----------------------------------------------------------------------------
// Receiver Sinks
// ----------------------------------------------------------------------------

/// An item tagged with the generation of the receiver that produced it.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub generation: ConnectionGeneration,
    pub item: T,
}

/// Generation-stamping sender handed to a [`Receiver`].
///
/// Receivers never see raw channels; everything they push is stamped with
/// the generation the sink was minted for.
#[derive(Debug)]
pub struct ReceiverSink<T> {
    generation: ConnectionGeneration,
    tx: mpsc::UnboundedSender<Stamped<T>>,
}

impl<T> ReceiverSink<T> {
    pub fn new(generation: ConnectionGeneration, tx: mpsc::UnboundedSender<Stamped<T>>) -> Self {
        ReceiverSink { generation, tx }
    }

    pub fn generation(&self) -> ConnectionGeneration {
        self.generation
    }

    /// Push one item. Returns false once the session side is gone.
    pub fn push(&self, item: T) -> bool {
        self.tx
            .send(Stamped {
                generation: self.generation,
                item,
            })
            .is_ok()
    }
}

impl<T> Clone for ReceiverSink<T> {
    fn clone(&self) -> Self {
        ReceiverSink {
            generation: self.generation,
            tx: self.tx.clone(),
        }
    }
}

pub type DeliverySink = ReceiverSink<InboundMessage>;
pub type MethodSink = ReceiverSink<MethodInvocation>;
pub type FaultSink = ReceiverSink<TransportError>;

// ----------------------------------------------------------------------------
// Receiver
// ----------------------------------------------------------------------------

/// Inbound half of a connected link.
///
/// Message routing and method routing are independent: each is attached
/// or bound when its own demand appears and removed when its own demand
/// reaches zero, even though both share the one receiver.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Begin routing hub-to-device messages into `sink`.
    async fn attach_message_sink(&self, sink: DeliverySink) -> TransportResult<()>;

    /// Stop routing hub-to-device messages.
    async fn detach_message_sink(&self) -> TransportResult<()>;

    /// Route invocations of the named method into `sink`.
    async fn bind_method(&self, name: &str, sink: MethodSink) -> TransportResult<()>;

    /// Register the sink receiver-side faults are reported through.
    /// Faults are forwarded regardless of listener demand.
    fn attach_fault_sink(&self, sink: FaultSink);
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// A pluggable device-to-hub link.
///
/// Only [`capabilities`](Transport::capabilities),
/// [`link_events`](Transport::link_events) and
/// [`receiver`](Transport::receiver) are mandatory. The capability
/// descriptor must agree with the methods a transport actually overrides;
/// the default bodies are a backstop, not a substitute for gating.
#[async_trait]
pub trait Transport: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Subscribe to out-of-band link drops.
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;

    /// Current inbound half. Called once per successful connect.
    async fn receiver(&self) -> TransportResult<Arc<dyn Receiver>>;

    /// Establish the link. Transports with no connect step inherit the
    /// trivial success.
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Tear the link down. Trivially successful by default.
    async fn disconnect(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn send_event(&self, message: Message) -> TransportResult<()> {
        let _ = message;
        Err(TransportError::OperationUnsupported {
            operation: "send_event",
        })
    }

    async fn send_event_batch(&self, messages: Vec<Message>) -> TransportResult<()> {
        let _ = messages;
        Err(TransportError::OperationUnsupported {
            operation: "send_event_batch",
        })
    }

    async fn complete(&self, message: InboundMessage) -> TransportResult<()> {
        let _ = message;
        Err(TransportError::OperationUnsupported {
            operation: "complete",
        })
    }

    async fn reject(&self, message: InboundMessage) -> TransportResult<()> {
        let _ = message;
        Err(TransportError::OperationUnsupported {
            operation: "reject",
        })
    }

    async fn abandon(&self, message: InboundMessage) -> TransportResult<()> {
        let _ = message;
        Err(TransportError::OperationUnsupported {
            operation: "abandon",
        })
    }

    /// Apply a fresh security token to the link.
    async fn update_token(&self, token: SecurityToken) -> TransportResult<TokenUpdateOutcome> {
        let _ = token;
        Err(TransportError::OperationUnsupported {
            operation: "update_token",
        })
    }

    /// Apply pass-through tuning. Transports ignore unknown options.
    async fn set_options(&self, options: TransportOptions) -> TransportResult<()> {
        let _ = options;
        Ok(())
    }
}
