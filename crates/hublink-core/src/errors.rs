//! Error types for the hublink device client
//!
//! Argument and capability failures are detected on the calling side before
//! any transport interaction. Transport failures are never rewrapped: they
//! pass through to callers exactly as the transport raised them, shared
//! behind an `Arc` so one failure can answer every operation that was queued
//! behind the transition that produced it.

use core::fmt;
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Operation Names
// ----------------------------------------------------------------------------

/// Public client operations, named for capability gating and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    Close,
    SendEvent,
    SendEventBatch,
    Complete,
    Reject,
    Abandon,
    UpdateToken,
    RegisterMethod,
    SubscribeMessages,
    SetOptions,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::SendEvent => "send_event",
            Operation::SendEventBatch => "send_event_batch",
            Operation::Complete => "complete",
            Operation::Reject => "reject",
            Operation::Abandon => "abandon",
            Operation::UpdateToken => "update_security_token",
            Operation::RegisterMethod => "register_method",
            Operation::SubscribeMessages => "subscribe_messages",
            Operation::SetOptions => "set_transport_options",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures raised by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport does not implement {operation}")]
    OperationUnsupported { operation: &'static str },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Link I/O error: {message}")]
    Io { message: String },

    #[error("Request rejected by hub: {message}")]
    Rejected { message: String },

    #[error("Security token rejected: {message}")]
    TokenRejected { message: String },
}

impl TransportError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        TransportError::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        TransportError::Io {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        TransportError::Rejected {
            message: message.into(),
        }
    }

    pub fn token_rejected(message: impl Into<String>) -> Self {
        TransportError::TokenRejected {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Client Errors
// ----------------------------------------------------------------------------

/// Errors surfaced to callers of the device client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// A required argument was absent or empty.
    #[error("Required argument missing: {name}")]
    ArgumentMissing { name: &'static str },

    /// An argument was present but had the wrong shape.
    #[error("Argument {name} is invalid: expected {expected}")]
    ArgumentInvalid {
        name: &'static str,
        expected: &'static str,
    },

    /// The configured transport does not support the requested operation.
    /// Raised before any queuing decision or connect attempt.
    #[error("Operation not implemented by this transport: {operation}")]
    NotImplemented { operation: Operation },

    /// A method handler is already registered under this name.
    #[error("Method already registered: {name}")]
    DuplicateRegistration { name: String },

    /// The transport failed; the original error passes through verbatim.
    #[error(transparent)]
    Transport(#[from] Arc<TransportError>),

    /// The session task is gone (every client handle was dropped).
    #[error("Client is closed")]
    Closed,
}

impl ClientError {
    pub fn argument_missing(name: &'static str) -> Self {
        ClientError::ArgumentMissing { name }
    }

    pub fn not_implemented(operation: Operation) -> Self {
        ClientError::NotImplemented { operation }
    }

    pub fn transport(error: TransportError) -> Self {
        ClientError::Transport(Arc::new(error))
    }

    /// True when the error originated in the transport rather than in
    /// client-side validation.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        ClientError::transport(error)
    }
}

pub type ClientResult<T> = core::result::Result<T, ClientError>;
pub type TransportResult<T> = core::result::Result<T, TransportError>;
