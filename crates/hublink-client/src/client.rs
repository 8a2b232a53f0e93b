//! Client handle
//!
//! The cloneable, caller-facing half of the client. Every call becomes a
//! command for the session task; argument validation and capability
//! gating happen here, before anything is queued, so a call the transport
//! can never serve fails the same way whether or not a link is up.

use crate::bridge::SubscriptionId;
use crate::methods::MethodHandler;
use crate::session::{ClientCommand, TokenInitiator};
use hublink_core::{
    ClientError, ClientEvent, ClientResult, ConnectionState, Disposition, InboundMessage,
    Message, Operation, SecurityToken, TransportCapabilities, TransportOptions,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ----------------------------------------------------------------------------
// Device Client
// ----------------------------------------------------------------------------

/// Handle to a running device session.
///
/// Cheap to clone; all clones talk to the same session task and share one
/// connection. The session stays alive until every clone is dropped.
#[derive(Clone)]
pub struct DeviceClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    capabilities: TransportCapabilities,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl DeviceClient {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<ClientCommand>,
        capabilities: TransportCapabilities,
        events: broadcast::Sender<ClientEvent>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        DeviceClient { commands, capabilities, events, state }
    }

    /// Open the connection. Resolves once the link is up; a no-op when it
    /// already is. Concurrent opens share the same attempt.
    pub async fn open(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Open { reply }, rx).await
    }

    /// Close the connection, resolving once the link is down. Operations
    /// already queued ahead of the close still run first.
    pub async fn close(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Close { reply }, rx).await
    }

    /// Send one device-to-cloud event, connecting first if necessary.
    pub async fn send_event(&self, message: Message) -> ClientResult<()> {
        self.ensure_supported(Operation::SendEvent)?;
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::SendEvent { message, reply }, rx).await
    }

    /// Send a batch of events as one transport operation.
    pub async fn send_event_batch(&self, messages: Vec<Message>) -> ClientResult<()> {
        if messages.is_empty() {
            return Err(ClientError::argument_missing("messages"));
        }
        self.ensure_supported(Operation::SendEventBatch)?;
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::SendEventBatch { messages, reply }, rx).await
    }

    /// Settle a delivery as processed; the hub will not redeliver it.
    pub async fn complete(&self, message: InboundMessage) -> ClientResult<()> {
        self.settle(Disposition::Complete, message).await
    }

    /// Settle a delivery as unprocessable; the hub dead-letters it.
    pub async fn reject(&self, message: InboundMessage) -> ClientResult<()> {
        self.settle(Disposition::Reject, message).await
    }

    /// Release a delivery back to the hub for redelivery.
    pub async fn abandon(&self, message: InboundMessage) -> ClientResult<()> {
        self.settle(Disposition::Abandon, message).await
    }

    async fn settle(&self, disposition: Disposition, message: InboundMessage) -> ClientResult<()> {
        if message.lock_token.is_empty() {
            return Err(ClientError::argument_missing("lock_token"));
        }
        self.ensure_supported(disposition.operation())?;
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Settle { disposition, message, reply }, rx).await
    }

    /// Hand the transport a fresh security token. While connected this
    /// runs as its own transition; transports that cannot re-authenticate
    /// a live link reconnect under the new token before this resolves.
    pub async fn update_security_token(&self, token: impl Into<String>) -> ClientResult<()> {
        let token = token.into();
        if token.is_empty() {
            return Err(ClientError::argument_missing("token"));
        }
        self.ensure_supported(Operation::UpdateToken)?;
        let (reply, rx) = oneshot::channel();
        let command = ClientCommand::UpdateToken {
            token: SecurityToken::new(token),
            initiator: TokenInitiator::Caller,
            reply: Some(reply),
        };
        self.request(command, rx).await
    }

    /// Register a handler for direct method calls addressed to `name`.
    /// Registrations survive reconnects: routes are replayed onto every
    /// fresh link before it reports connected.
    pub async fn register_method(
        &self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
    ) -> ClientResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(ClientError::argument_missing("name"));
        }
        self.ensure_supported(Operation::RegisterMethod)?;
        let (reply, rx) = oneshot::channel();
        let command = ClientCommand::RegisterMethod {
            name,
            handler: Arc::new(handler),
            reply,
        };
        self.request(command, rx).await
    }

    /// Start receiving cloud-to-device messages. Every live subscription
    /// gets its own copy of each delivery; dropping the returned handle
    /// ends this one.
    pub async fn subscribe_messages(&self) -> ClientResult<MessageSubscription> {
        self.ensure_supported(Operation::SubscribeMessages)?;
        let (sink, messages) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::SubscribeMessages { sink, reply })
            .map_err(|_| ClientError::Closed)?;
        let id = rx.await.map_err(|_| ClientError::Closed)??;
        Ok(MessageSubscription { id, messages, commands: self.commands.clone() })
    }

    /// Pass tuning options through to the transport.
    pub async fn set_transport_options(&self, options: TransportOptions) -> ClientResult<()> {
        self.ensure_supported(Operation::SetOptions)?;
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::SetOptions { options, reply }, rx).await
    }

    /// The connection state right now.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A watcher over connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle and background-failure events. Events are
    /// not buffered for subscribers that have not been created yet.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// What the underlying transport can do.
    pub fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn ensure_supported(&self, operation: Operation) -> ClientResult<()> {
        if self.capabilities.supports(operation) {
            Ok(())
        } else {
            Err(ClientError::not_implemented(operation))
        }
    }

    async fn request(
        &self,
        command: ClientCommand,
        rx: oneshot::Receiver<ClientResult<()>>,
    ) -> ClientResult<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

// ----------------------------------------------------------------------------
// Message Subscription
// ----------------------------------------------------------------------------

/// A live cloud-to-device message stream. Dropping it unsubscribes; when
/// the last subscription goes, the client detaches its message sink from
/// the transport without touching method routes.
#[derive(Debug)]
pub struct MessageSubscription {
    id: SubscriptionId,
    messages: mpsc::UnboundedReceiver<InboundMessage>,
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl MessageSubscription {
    /// The next delivery, or `None` once the session has shut down.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.messages.recv().await
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(ClientCommand::UnsubscribeMessages { id: self.id });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hublink_core::MethodInvocation;

    fn handle(capabilities: TransportCapabilities) -> (DeviceClient, mpsc::UnboundedReceiver<ClientCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(4);
        let (_state_tx, state) = watch::channel(ConnectionState::Disconnected);
        (DeviceClient::new(commands, capabilities, events, state), rx)
    }

    #[tokio::test]
    async fn test_unsupported_operations_fail_before_reaching_the_session() {
        let (client, mut rx) = handle(TransportCapabilities::send_only());

        let message = InboundMessage::new(Message::new(b"m".to_vec()), "lock-1");
        let error = client.complete(message).await.unwrap_err();
        assert!(matches!(error, ClientError::NotImplemented { operation: Operation::Complete }));
        assert!(rx.try_recv().is_err());

        let error = client.subscribe_messages().await.unwrap_err();
        assert!(matches!(
            error,
            ClientError::NotImplemented { operation: Operation::SubscribeMessages }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_arguments_are_rejected_locally() {
        let (client, mut rx) = handle(TransportCapabilities::full());

        let error = client.send_event_batch(Vec::new()).await.unwrap_err();
        assert!(matches!(error, ClientError::ArgumentMissing { .. }));

        let error = client
            .register_method("", |_invocation: MethodInvocation| async {})
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::ArgumentMissing { .. }));

        let error = client.update_security_token("").await.unwrap_err();
        assert!(matches!(error, ClientError::ArgumentMissing { .. }));

        let unlocked = InboundMessage::new(Message::new(b"m".to_vec()), "");
        let error = client.abandon(unlocked).await.unwrap_err();
        assert!(matches!(error, ClientError::ArgumentMissing { .. }));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_a_stopped_session_answers_closed() {
        let (client, rx) = handle(TransportCapabilities::full());
        drop(rx);

        let error = client.open().await.unwrap_err();
        assert!(matches!(error, ClientError::Closed));
    }
}
