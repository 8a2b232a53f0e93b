//! Hublink Client Engine
//!
//! This crate contains the device-side session engine for hub messaging,
//! including:
//! - `DeviceClient`: the cloneable handle device applications call
//! - `ClientBuilder`: wires a transport and credentials into a running
//!   session
//! - `MessageSubscription`: a per-listener stream of hub-to-device
//!   messages
//! - `MethodHandler`: callbacks for direct method invocations
//!
//! This is the "engine" side of hublink - it owns connection state,
//! operation queuing and token renewal, while `hublink-core` provides the
//! stable transport and data-model definitions.

mod bridge;
mod builder;
mod client;
mod methods;
mod renewal;
mod session;

pub use bridge::SubscriptionId;
pub use builder::ClientBuilder;
pub use client::{DeviceClient, MessageSubscription};
pub use methods::MethodHandler;

// Re-export core types for convenience
pub use hublink_core::{
    CertificateCredentials, ChannelConfig, ClientConfig, ClientError, ClientEvent, ClientResult,
    ConnectionGeneration, ConnectionState, Credentials, DeliverySink, Disposition, FaultSink,
    InboundMessage, LinkEvent, Message, MethodInvocation, MethodSink, Operation, Receiver,
    ReceiverSink, SecurityToken, SharedKeyCredentials, Stamped, TokenUpdateOutcome, Transport,
    TransportCapabilities, TransportError, TransportOptions, TransportResult, DEFAULT_TOKEN_TTL,
};
