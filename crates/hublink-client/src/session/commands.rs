//! Command and event vocabulary for the session task
//!
//! `ClientCommand` flows handle-to-task; every operation carries a oneshot
//! responder that resolves when the operation settles (possibly after
//! sitting in the pending queue through a transition or an auto-connect).
//! `SessionEvent` flows back into the task from its own spawned transition
//! tasks, the receiver-op worker, and the renewal timer.

use crate::bridge::SubscriptionId;
use crate::methods::MethodHandler;
use crate::session::receiver_ops::ReceiverOpKind;
use hublink_core::{
    ClientError, ClientResult, ConnectionGeneration, Disposition, InboundMessage, Message,
    Receiver, SecurityToken, TokenUpdateOutcome, TransportError, TransportOptions,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Completion responder for one public operation.
pub(crate) type Responder = oneshot::Sender<ClientResult<()>>;

/// Responder for subscribe, which also yields the subscription id.
pub(crate) type SubscribeResponder = oneshot::Sender<ClientResult<SubscriptionId>>;

/// Who asked for a token update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenInitiator {
    /// An explicit `update_security_token` call.
    Caller,
    /// The renewal timer.
    Scheduler,
}

// ----------------------------------------------------------------------------
// Client Commands
// ----------------------------------------------------------------------------

/// Operations sent from client handles to the session task.
pub(crate) enum ClientCommand {
    Open {
        reply: Responder,
    },
    Close {
        reply: Responder,
    },
    SendEvent {
        message: Message,
        reply: Responder,
    },
    SendEventBatch {
        messages: Vec<Message>,
        reply: Responder,
    },
    Settle {
        disposition: Disposition,
        message: InboundMessage,
        reply: Responder,
    },
    UpdateToken {
        token: SecurityToken,
        initiator: TokenInitiator,
        /// Absent for scheduler renewals; their failures go to the client
        /// event channel instead.
        reply: Option<Responder>,
    },
    RegisterMethod {
        name: String,
        handler: Arc<dyn MethodHandler>,
        reply: Responder,
    },
    SubscribeMessages {
        sink: mpsc::UnboundedSender<InboundMessage>,
        reply: SubscribeResponder,
    },
    UnsubscribeMessages {
        id: SubscriptionId,
    },
    SetOptions {
        options: TransportOptions,
        reply: Responder,
    },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Open { .. } => "open",
            ClientCommand::Close { .. } => "close",
            ClientCommand::SendEvent { .. } => "send_event",
            ClientCommand::SendEventBatch { .. } => "send_event_batch",
            ClientCommand::Settle { disposition, .. } => disposition.name(),
            ClientCommand::UpdateToken { .. } => "update_security_token",
            ClientCommand::RegisterMethod { .. } => "register_method",
            ClientCommand::SubscribeMessages { .. } => "subscribe_messages",
            ClientCommand::UnsubscribeMessages { .. } => "unsubscribe_messages",
            ClientCommand::SetOptions { .. } => "set_transport_options",
        }
    }

    /// Answer this command's responder with `error`. Returns false when the
    /// command had nobody to answer.
    pub fn fail(self, error: ClientError) -> bool {
        match self {
            ClientCommand::Open { reply }
            | ClientCommand::Close { reply }
            | ClientCommand::SendEvent { reply, .. }
            | ClientCommand::SendEventBatch { reply, .. }
            | ClientCommand::Settle { reply, .. }
            | ClientCommand::RegisterMethod { reply, .. }
            | ClientCommand::SetOptions { reply, .. } => {
                let _ = reply.send(Err(error));
                true
            }
            ClientCommand::UpdateToken { reply, .. } => match reply {
                Some(reply) => {
                    let _ = reply.send(Err(error));
                    true
                }
                None => false,
            },
            ClientCommand::SubscribeMessages { reply, .. } => {
                let _ = reply.send(Err(error));
                true
            }
            ClientCommand::UnsubscribeMessages { .. } => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Everything a successful connect transition hands back to the task.
pub(crate) struct ConnectedLink {
    pub generation: ConnectionGeneration,
    /// Absent when the transport has neither message nor method capability.
    pub receiver: Option<Arc<dyn Receiver>>,
    /// Whether the transition re-attached the message sink (listener
    /// demand was live when the transition was spawned).
    pub messages_attached: bool,
}

/// Outcomes and ticks reported back into the session task.
pub(crate) enum SessionEvent {
    /// A connect transition settled.
    ConnectSettled {
        seq: u64,
        result: Result<ConnectedLink, Arc<TransportError>>,
    },
    /// A disconnect transition settled. Carries the close initiator's
    /// responder: a failed disconnect reports its error there even though
    /// the link is treated as torn down either way.
    DisconnectSettled {
        seq: u64,
        reply: Responder,
        result: Result<(), Arc<TransportError>>,
    },
    /// A token-update transition settled on a live link.
    TokenSettled {
        seq: u64,
        initiator: TokenInitiator,
        reply: Option<Responder>,
        result: Result<TokenUpdateOutcome, Arc<TransportError>>,
    },
    /// A direct (no-transition) token update issued while disconnected
    /// settled.
    DirectTokenSettled {
        initiator: TokenInitiator,
        reply: Option<Responder>,
        result: Result<(), Arc<TransportError>>,
    },
    /// A serialized receiver mutation failed. Its caller, if any, was
    /// already answered by the worker; the task rolls back bookkeeping.
    ReceiverOpFailed {
        generation: ConnectionGeneration,
        op: ReceiverOpKind,
        error: Arc<TransportError>,
        answered: bool,
    },
    /// The renewal timer fired. Stamped with the arming that scheduled it,
    /// so a tick that raced a cancel or re-arm through this channel is
    /// recognizable as stale.
    RenewalDue { arming: u64 },
}
