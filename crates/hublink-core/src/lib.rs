//! hublink core types and transport contract
//!
//! This crate provides the vocabulary shared between the hublink device
//! client and its transports: the message model, the capability-polymorphic
//! [`Transport`]/[`Receiver`] contract, credentials and token minting, the
//! error taxonomy, and client configuration. The session engine that drives
//! these types lives in `hublink-client`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod events;
pub mod message;
pub mod security;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ChannelConfig, ClientConfig};
pub use errors::{ClientError, ClientResult, Operation, TransportError, TransportResult};
pub use events::ClientEvent;
pub use message::{Disposition, InboundMessage, Message, MethodInvocation};
pub use security::{
    CertificateCredentials, Credentials, SecurityToken, SharedKeyCredentials, DEFAULT_TOKEN_TTL,
};
pub use transport::{
    DeliverySink, FaultSink, LinkEvent, MethodSink, Receiver, ReceiverSink, Stamped,
    TokenUpdateOutcome, Transport, TransportCapabilities, TransportOptions,
};
pub use types::{ConnectionGeneration, ConnectionState};
