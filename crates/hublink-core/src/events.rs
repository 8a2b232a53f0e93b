//! Application-facing notifications

use crate::errors::ClientError;
use crate::types::ConnectionGeneration;

/// Out-of-band notifications broadcast by the session task.
///
/// `Disconnected` is raised only for drops signaled by the transport;
/// a client-initiated close settles through its own responder and does
/// not produce an event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connect transition settled successfully.
    Connected { generation: ConnectionGeneration },
    /// The transport dropped the link outside a client-initiated close.
    Disconnected { reason: String },
    /// A background failure with no caller responder to report to:
    /// receiver faults, scheduled renewal failures, late receiver-op
    /// failures.
    Error(ClientError),
}
