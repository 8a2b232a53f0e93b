//! Session task loop
//!
//! The single owner of connection state. Commands from client handles,
//! transition outcomes, receiver traffic, link drops and renewal ticks all
//! arrive over channels and are applied here one at a time, so no lock is
//! ever held across transport I/O and no two transitions can be in flight
//! at once. The loop itself never awaits a transport call: transitions and
//! data-plane operations run in spawned tasks that report back through the
//! session event channel or answer their caller directly.

use crate::bridge::SubscriptionId;
use crate::methods::MethodHandler;
use crate::renewal::RenewalTimer;
use crate::session::commands::{
    ClientCommand, ConnectedLink, Responder, SessionEvent, SubscribeResponder, TokenInitiator,
};
use crate::session::receiver_ops::{ReceiverOp, ReceiverOpKind, ReceiverOpsHandle};
use crate::session::state::SessionState;
use hublink_core::{
    ClientConfig, ClientError, ClientEvent, ConnectionGeneration, ConnectionState, Credentials,
    Disposition, InboundMessage, LinkEvent, MethodInvocation, Operation, ReceiverSink,
    SecurityToken, Stamped, TokenUpdateOutcome, Transport, TransportCapabilities, TransportError,
    TransportOptions, TransportResult,
};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

pub(crate) struct SessionTask {
    transport: Arc<dyn Transport>,
    capabilities: TransportCapabilities,
    credentials: Option<Credentials>,
    config: ClientConfig,
    state: SessionState,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    client_events: broadcast::Sender<ClientEvent>,
    link_events: broadcast::Receiver<LinkEvent>,
    link_events_open: bool,
    deliveries_tx: mpsc::UnboundedSender<Stamped<InboundMessage>>,
    deliveries_rx: mpsc::UnboundedReceiver<Stamped<InboundMessage>>,
    invocations_tx: mpsc::UnboundedSender<Stamped<MethodInvocation>>,
    invocations_rx: mpsc::UnboundedReceiver<Stamped<MethodInvocation>>,
    faults_tx: mpsc::UnboundedSender<Stamped<TransportError>>,
    faults_rx: mpsc::UnboundedReceiver<Stamped<TransportError>>,
    /// Worker serializing mutations on the current receiver. Replaced on
    /// every successful connect, dropped whenever the link goes away.
    receiver_ops: Option<ReceiverOpsHandle>,
    renewal: RenewalTimer,
}

impl SessionTask {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Option<Credentials>,
        config: ClientConfig,
        commands: mpsc::UnboundedReceiver<ClientCommand>,
        client_events: broadcast::Sender<ClientEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let (invocations_tx, invocations_rx) = mpsc::unbounded_channel();
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let capabilities = transport.capabilities();
        let link_events = transport.link_events();

        SessionTask {
            transport,
            capabilities,
            credentials,
            config,
            state: SessionState::new(state_tx),
            commands,
            events_tx,
            events_rx,
            client_events,
            link_events,
            link_events_open: true,
            deliveries_tx,
            deliveries_rx,
            invocations_tx,
            invocations_rx,
            faults_tx,
            faults_rx,
            receiver_ops: None,
            renewal: RenewalTimer::new(),
        }
    }

    pub async fn run(mut self) {
        info!("session task starting");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("all client handles dropped, session task stopping");
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_session_event(event),
                Some(delivery) = self.deliveries_rx.recv() => self.handle_delivery(delivery),
                Some(invocation) = self.invocations_rx.recv() => self.handle_invocation(invocation),
                Some(fault) = self.faults_rx.recv() => self.handle_fault(fault),
                link = self.link_events.recv(), if self.link_events_open => {
                    self.handle_link_event(link)
                }
            }
        }

        self.renewal.cancel();
        self.receiver_ops = None;
        info!("session task stopped");
    }

    // ------------------------------------------------------------------------
    // Command Dispatch
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: ClientCommand) {
        debug!(operation = command.name(), state = %self.state.state(), "command received");
        if let Some(deferred) = self.dispatch(command) {
            self.state.enqueue(deferred);
        }
    }

    /// Apply the state table to one operation. Returns the operation back
    /// when it must wait for the in-flight transition (the caller decides
    /// its queue position: fresh arrivals go to the back, drained ones
    /// return to the front).
    fn dispatch(&mut self, command: ClientCommand) -> Option<ClientCommand> {
        match command {
            // Bookkeeping and pass-through; never queued.
            ClientCommand::UnsubscribeMessages { id } => {
                self.unsubscribe(id);
                None
            }
            ClientCommand::SetOptions { options, reply } => {
                self.spawn_set_options(options, reply);
                None
            }
            ClientCommand::Open { reply } => match self.state.state() {
                // Idempotent: the link is up (or staying up through the
                // token update); no second transport connect.
                ConnectionState::Connected | ConnectionState::UpdatingToken => {
                    let _ = reply.send(Ok(()));
                    None
                }
                ConnectionState::Disconnected => {
                    self.spawn_connect();
                    Some(ClientCommand::Open { reply })
                }
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    Some(ClientCommand::Open { reply })
                }
            },
            ClientCommand::Close { reply } => match self.state.state() {
                ConnectionState::Disconnected => {
                    let _ = reply.send(Ok(()));
                    None
                }
                ConnectionState::Connected => {
                    self.spawn_disconnect(reply);
                    None
                }
                _ => Some(ClientCommand::Close { reply }),
            },
            ClientCommand::UpdateToken { token, initiator, reply } => match self.state.state() {
                ConnectionState::Connected => {
                    self.spawn_token_update(token, initiator, reply);
                    None
                }
                ConnectionState::Disconnected => {
                    self.spawn_direct_token_update(token, initiator, reply);
                    None
                }
                _ => Some(ClientCommand::UpdateToken { token, initiator, reply }),
            },
            // Data-plane operations: execute when connected, auto-connect
            // when disconnected, wait out the transition otherwise.
            command => match self.state.state() {
                ConnectionState::Connected => {
                    self.execute_connected(command);
                    None
                }
                ConnectionState::Disconnected => {
                    self.spawn_connect();
                    Some(command)
                }
                _ => Some(command),
            },
        }
    }

    /// Run one data-plane operation against the live link.
    fn execute_connected(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::SendEvent { message, reply } => {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let result = transport.send_event(message).await;
                    let _ = reply.send(result.map_err(ClientError::transport));
                });
            }
            ClientCommand::SendEventBatch { messages, reply } => {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let result = transport.send_event_batch(messages).await;
                    let _ = reply.send(result.map_err(ClientError::transport));
                });
            }
            ClientCommand::Settle { disposition, message, reply } => {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let result = match disposition {
                        Disposition::Complete => transport.complete(message).await,
                        Disposition::Reject => transport.reject(message).await,
                        Disposition::Abandon => transport.abandon(message).await,
                    };
                    let _ = reply.send(result.map_err(ClientError::transport));
                });
            }
            ClientCommand::RegisterMethod { name, handler, reply } => {
                self.register_method(name, handler, reply);
            }
            ClientCommand::SubscribeMessages { sink, reply } => {
                self.subscribe_messages(sink, reply);
            }
            ClientCommand::Open { .. }
            | ClientCommand::Close { .. }
            | ClientCommand::UpdateToken { .. }
            | ClientCommand::SetOptions { .. }
            | ClientCommand::UnsubscribeMessages { .. } => {
                unreachable!("lifecycle commands are routed by dispatch")
            }
        }
    }

    fn register_method(&mut self, name: String, handler: Arc<dyn MethodHandler>, reply: Responder) {
        // Duplicate detection happens here, at dispatch time, so
        // registrations queued behind a transition resolve in arrival order.
        if let Err(error) = self.state.registry.register(name.clone(), handler) {
            let _ = reply.send(Err(error));
            return;
        }
        let (Some(ops), Some(generation)) =
            (self.receiver_ops.as_ref(), self.state.live_generation())
        else {
            // Capability gating guarantees a connected method-capable
            // client holds a receiver; anything else is a torn-down link.
            self.state.registry.remove(&name);
            let _ = reply.send(Err(ClientError::not_implemented(Operation::RegisterMethod)));
            return;
        };
        let sink = ReceiverSink::new(generation, self.invocations_tx.clone());
        ops.push(ReceiverOp::BindMethod { name, sink, reply });
    }

    fn subscribe_messages(
        &mut self,
        sink: mpsc::UnboundedSender<InboundMessage>,
        reply: SubscribeResponder,
    ) {
        let id = self.state.bridge.add(sink);
        if self.state.bridge.is_attached() {
            let _ = reply.send(Ok(id));
            return;
        }
        let (Some(ops), Some(generation)) =
            (self.receiver_ops.as_ref(), self.state.live_generation())
        else {
            self.state.bridge.remove(id);
            let _ = reply.send(Err(ClientError::not_implemented(Operation::SubscribeMessages)));
            return;
        };
        // Marked attached before the worker confirms, so a second
        // subscriber cannot race a duplicate attach; a failure rolls this
        // back through the receiver-op failure path.
        self.state.bridge.set_attached(true);
        let delivery_sink = ReceiverSink::new(generation, self.deliveries_tx.clone());
        ops.push(ReceiverOp::AttachMessages { sink: delivery_sink, reply: Some((id, reply)) });
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.state.bridge.remove(id);
        // Message-listener teardown is independent of method handlers; the
        // sink detaches exactly once, when message demand alone hits zero.
        if self.state.bridge.is_attached() && !self.state.bridge.has_demand() {
            if let Some(ops) = &self.receiver_ops {
                ops.push(ReceiverOp::DetachMessages);
            }
            self.state.bridge.set_attached(false);
        }
    }

    fn spawn_set_options(&self, options: TransportOptions, reply: Responder) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let result = transport.set_options(options).await;
            let _ = reply.send(result.map_err(ClientError::transport));
        });
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn spawn_connect(&mut self) {
        self.state.set_state(ConnectionState::Connecting);
        let seq = self.state.begin_transition();
        let generation = self.state.mint_generation();
        debug!(seq, %generation, "starting connect transition");

        let plan = ConnectPlan {
            transport: Arc::clone(&self.transport),
            generation,
            needs_receiver: self.capabilities.needs_receiver(),
            method_names: self.state.registry.names(),
            attach_messages: self.state.bridge.has_demand(),
            deliveries: self.deliveries_tx.clone(),
            invocations: self.invocations_tx.clone(),
            faults: self.faults_tx.clone(),
        };
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = establish_link(plan).await.map_err(Arc::new);
            let _ = events.send(SessionEvent::ConnectSettled { seq, result });
        });
    }

    fn spawn_disconnect(&mut self, reply: Responder) {
        self.state.set_state(ConnectionState::Disconnecting);
        // The link is coming down no matter what the transport answers;
        // receiver bookkeeping and the renewal timer go now, not on settle.
        self.renewal.cancel();
        self.drop_link_bookkeeping();
        let seq = self.state.begin_transition();
        debug!(seq, "starting disconnect transition");

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport.disconnect().await.map_err(Arc::new);
            let _ = events.send(SessionEvent::DisconnectSettled { seq, reply, result });
        });
    }

    fn spawn_token_update(
        &mut self,
        token: SecurityToken,
        initiator: TokenInitiator,
        reply: Option<Responder>,
    ) {
        self.state.set_state(ConnectionState::UpdatingToken);
        // This renewal supersedes the outstanding deadline; a fresh timer
        // is armed when the update settles successfully.
        self.renewal.cancel();
        let seq = self.state.begin_transition();
        debug!(seq, ?initiator, "starting token update transition");

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport.update_token(token).await.map_err(Arc::new);
            let _ = events.send(SessionEvent::TokenSettled { seq, initiator, reply, result });
        });
    }

    /// Token update with no link up: a plain transport call, no transition.
    fn spawn_direct_token_update(
        &mut self,
        token: SecurityToken,
        initiator: TokenInitiator,
        reply: Option<Responder>,
    ) {
        self.renewal.cancel();
        debug!(?initiator, "token update while disconnected goes straight to the transport");
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            // ReconnectRequired is meaningless with no live link; the next
            // connect picks the fresh token up anyway.
            let result = transport.update_token(token).await.map(|_| ()).map_err(Arc::new);
            let _ = events.send(SessionEvent::DirectTokenSettled { initiator, reply, result });
        });
    }

    // ------------------------------------------------------------------------
    // Transition Outcomes
    // ------------------------------------------------------------------------

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectSettled { seq, result } => self.on_connect_settled(seq, result),
            SessionEvent::DisconnectSettled { seq, reply, result } => {
                self.on_disconnect_settled(seq, reply, result)
            }
            SessionEvent::TokenSettled { seq, initiator, reply, result } => {
                self.on_token_settled(seq, initiator, reply, result)
            }
            SessionEvent::DirectTokenSettled { initiator, reply, result } => {
                self.on_direct_token_settled(initiator, reply, result)
            }
            SessionEvent::ReceiverOpFailed { generation, op, error, answered } => {
                self.on_receiver_op_failed(generation, op, error, answered)
            }
            SessionEvent::RenewalDue { arming } => self.on_renewal_due(arming),
        }
    }

    fn on_connect_settled(
        &mut self,
        seq: u64,
        result: Result<ConnectedLink, Arc<TransportError>>,
    ) {
        if !self.state.is_current_transition(seq) {
            debug!(seq, "stale connect outcome dropped");
            return;
        }
        match result {
            Ok(link) => {
                info!(generation = %link.generation, "connected");
                self.state.mark_link_up(link.generation);
                self.receiver_ops = link.receiver.map(|receiver| {
                    ReceiverOpsHandle::spawn(receiver, link.generation, self.events_tx.clone())
                });
                self.state.bridge.set_attached(link.messages_attached);
                // Demand can drop to zero while the connect is in flight;
                // the attachment snapshot is then one detach behind.
                if self.state.bridge.is_attached() && !self.state.bridge.has_demand() {
                    if let Some(ops) = &self.receiver_ops {
                        ops.push(ReceiverOp::DetachMessages);
                    }
                    self.state.bridge.set_attached(false);
                }
                self.state.set_state(ConnectionState::Connected);
                self.arm_renewal();
                self.broadcast(ClientEvent::Connected { generation: link.generation });
                self.drain_pending();
            }
            Err(error) => {
                warn!(%error, "connect failed");
                self.state.set_state(ConnectionState::Disconnected);
                // A scheduler-chained reconnect queues nothing, so the
                // flush alone can leave the failure unreported.
                if self.flush_pending(&error) == 0 {
                    self.broadcast(ClientEvent::Error(ClientError::Transport(error)));
                }
            }
        }
    }

    fn on_disconnect_settled(
        &mut self,
        seq: u64,
        reply: Responder,
        result: Result<(), Arc<TransportError>>,
    ) {
        if !self.state.is_current_transition(seq) {
            debug!(seq, "stale disconnect outcome dropped");
            return;
        }
        // Close is terminal regardless of the transport's verdict: the
        // state lands in Disconnected and only the initiator's responder
        // learns of a failure.
        if let Err(error) = &result {
            warn!(%error, "transport disconnect failed; treating the link as closed");
        }
        self.state.set_state(ConnectionState::Disconnected);
        let _ = reply.send(result.map_err(ClientError::Transport));
        self.drain_pending();
    }

    fn on_token_settled(
        &mut self,
        seq: u64,
        initiator: TokenInitiator,
        reply: Option<Responder>,
        result: Result<TokenUpdateOutcome, Arc<TransportError>>,
    ) {
        if !self.state.is_current_transition(seq) {
            debug!(seq, "stale token outcome dropped");
            return;
        }
        match result {
            Ok(TokenUpdateOutcome::Applied) => {
                debug!(?initiator, "token applied on the live link");
                self.state.set_state(ConnectionState::Connected);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                self.arm_renewal();
                self.drain_pending();
            }
            Ok(TokenUpdateOutcome::ReconnectRequired) => {
                info!(?initiator, "token update requires a fresh link, chaining into reconnect");
                // The initiator settles with the chained transition's
                // terminal outcome, ahead of everything already queued.
                if let Some(reply) = reply {
                    self.state.enqueue_front(ClientCommand::Open { reply });
                }
                self.drop_link_bookkeeping();
                self.spawn_connect();
            }
            Err(error) => {
                warn!(%error, ?initiator, "token update failed; the link stays up");
                self.state.set_state(ConnectionState::Connected);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(ClientError::Transport(error)));
                    }
                    // Scheduler renewals have no caller waiting; the timer
                    // stays unarmed until the next successful connect or
                    // renewal.
                    None => self.broadcast(ClientEvent::Error(ClientError::Transport(error))),
                }
                self.drain_pending();
            }
        }
    }

    fn on_direct_token_settled(
        &mut self,
        initiator: TokenInitiator,
        reply: Option<Responder>,
        result: Result<(), Arc<TransportError>>,
    ) {
        match result {
            Ok(()) => {
                debug!(?initiator, "token applied while disconnected");
                self.arm_renewal();
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(error) => {
                warn!(%error, ?initiator, "token update while disconnected failed");
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(ClientError::Transport(error)));
                    }
                    None => self.broadcast(ClientEvent::Error(ClientError::Transport(error))),
                }
            }
        }
    }

    fn on_receiver_op_failed(
        &mut self,
        generation: ConnectionGeneration,
        op: ReceiverOpKind,
        error: Arc<TransportError>,
        answered: bool,
    ) {
        if self.state.live_generation() != Some(generation) {
            debug!(%generation, "receiver failure from a replaced link dropped");
            return;
        }
        warn!(%error, ?op, "receiver operation failed");
        match op {
            ReceiverOpKind::AttachMessages { subscriber } => {
                self.state.bridge.set_attached(false);
                if let Some(id) = subscriber {
                    self.state.bridge.remove(id);
                }
            }
            ReceiverOpKind::DetachMessages => {}
            ReceiverOpKind::BindMethod { name } => {
                self.state.registry.remove(&name);
            }
        }
        if !answered {
            self.broadcast(ClientEvent::Error(ClientError::Transport(error)));
        }
    }

    fn on_renewal_due(&mut self, arming: u64) {
        // A tick can sit in the event channel across the cancel that
        // retires its timer (close, manual update, re-arm); it renews
        // nothing.
        if !self.renewal.is_current(arming) {
            debug!(arming, "tick from a superseded renewal timer dropped");
            return;
        }
        // Only renewable credentials ever arm the timer.
        let minted = self.credentials.as_ref().and_then(|c| c.mint(SystemTime::now()));
        let Some(token) = minted else { return };
        debug!("renewal timer fired, refreshing the security token");
        let command = ClientCommand::UpdateToken {
            token,
            initiator: TokenInitiator::Scheduler,
            reply: None,
        };
        if let Some(deferred) = self.dispatch(command) {
            self.state.enqueue(deferred);
        }
    }

    // ------------------------------------------------------------------------
    // Receiver Traffic
    // ------------------------------------------------------------------------

    fn handle_delivery(&mut self, delivery: Stamped<InboundMessage>) {
        if self.state.live_generation() != Some(delivery.generation) {
            debug!(generation = %delivery.generation, "delivery from a stale receiver dropped");
            return;
        }
        if self.state.bridge.dispatch(delivery.item) == 0 {
            debug!("delivery arrived with no live subscribers");
        }
    }

    fn handle_invocation(&mut self, invocation: Stamped<MethodInvocation>) {
        if self.state.live_generation() != Some(invocation.generation) {
            debug!(generation = %invocation.generation, "invocation from a stale receiver dropped");
            return;
        }
        match self.state.registry.lookup(&invocation.item.name) {
            Some(handler) => {
                // Each invocation runs apart from the session loop; a slow
                // handler never stalls dispatch.
                tokio::spawn(async move {
                    handler.handle(invocation.item).await;
                });
            }
            None => {
                warn!(method = %invocation.item.name, "invocation for an unregistered method dropped");
            }
        }
    }

    fn handle_fault(&mut self, fault: Stamped<TransportError>) {
        if self.state.live_generation() != Some(fault.generation) {
            debug!(generation = %fault.generation, "fault from a stale receiver dropped");
            return;
        }
        // Receiver faults reach the event channel no matter how many
        // message listeners exist.
        self.broadcast(ClientEvent::Error(ClientError::transport(fault.item)));
    }

    fn handle_link_event(&mut self, event: Result<LinkEvent, broadcast::error::RecvError>) {
        match event {
            Ok(LinkEvent::Dropped { reason }) => {
                if self.state.state() != ConnectionState::Connected {
                    // Mid-transition drops are stale news from the old
                    // link; queued operations keep waiting for the next
                    // successful connect.
                    debug!(%reason, state = %self.state.state(), "link drop ignored");
                    return;
                }
                warn!(%reason, "transport dropped the link");
                self.drop_link_bookkeeping();
                self.state.set_state(ConnectionState::Disconnected);
                self.broadcast(ClientEvent::Disconnected { reason });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "link event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("transport closed its link event channel");
                self.link_events_open = false;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queue Drain & Shared Plumbing
    // ------------------------------------------------------------------------

    /// Dispatch queued operations in arrival order. Runs once per settled
    /// transition; if a drained operation starts the next transition, the
    /// rest keep their order and wait for that one to settle.
    fn drain_pending(&mut self) {
        while !self.state.state().is_transitional() {
            let Some(command) = self.state.next_pending() else { break };
            debug!(operation = command.name(), "dispatching queued operation");
            if let Some(deferred) = self.dispatch(command) {
                self.state.enqueue_front(deferred);
                break;
            }
        }
    }

    /// Fail every queued operation with the error that settled the
    /// transition they were waiting on. Returns how many operations were
    /// flushed; zero means nothing reported the error anywhere.
    fn flush_pending(&mut self, error: &Arc<TransportError>) -> usize {
        let flushed = self.state.take_pending();
        if flushed.is_empty() {
            return 0;
        }
        debug!(count = flushed.len(), "failing queued operations with the transition error");
        let count = flushed.len();
        for command in flushed {
            if !command.fail(ClientError::Transport(Arc::clone(error))) {
                // No responder was waiting (scheduler-initiated work); the
                // failure still has to surface somewhere.
                self.broadcast(ClientEvent::Error(ClientError::Transport(Arc::clone(error))));
            }
        }
        count
    }

    fn drop_link_bookkeeping(&mut self) {
        // Dropping the handle lets the worker drain out with the old
        // receiver; its sinks are already stale by generation.
        self.receiver_ops = None;
        self.state.bridge.reset_attachment();
        self.state.mark_link_down();
    }

    fn arm_renewal(&mut self) {
        let renewable = self.credentials.as_ref().is_some_and(Credentials::supports_renewal);
        if renewable {
            self.renewal.arm(self.config.token_renewal_interval, self.events_tx.clone());
        }
    }

    fn broadcast(&self, event: ClientEvent) {
        // No subscribers is not an error.
        let _ = self.client_events.send(event);
    }
}

// ----------------------------------------------------------------------------
// Connect Transition Body
// ----------------------------------------------------------------------------

/// Everything a connect transition needs, snapshotted at spawn time.
struct ConnectPlan {
    transport: Arc<dyn Transport>,
    generation: ConnectionGeneration,
    needs_receiver: bool,
    method_names: Vec<String>,
    attach_messages: bool,
    deliveries: mpsc::UnboundedSender<Stamped<InboundMessage>>,
    invocations: mpsc::UnboundedSender<Stamped<MethodInvocation>>,
    faults: mpsc::UnboundedSender<Stamped<TransportError>>,
}

/// Connect, acquire the receiver when the transport has one, wire the
/// fault sink, replay method routes in registration order, and re-attach
/// the message sink when listener demand was live at spawn time. Replay
/// happens here so it precedes both the connected signal and the drain of
/// any operations queued behind the transition.
async fn establish_link(plan: ConnectPlan) -> TransportResult<ConnectedLink> {
    plan.transport.connect().await?;
    if !plan.needs_receiver {
        return Ok(ConnectedLink {
            generation: plan.generation,
            receiver: None,
            messages_attached: false,
        });
    }

    let receiver = plan.transport.receiver().await?;
    receiver.attach_fault_sink(ReceiverSink::new(plan.generation, plan.faults));
    for name in &plan.method_names {
        receiver
            .bind_method(name, ReceiverSink::new(plan.generation, plan.invocations.clone()))
            .await?;
    }
    if plan.attach_messages {
        receiver
            .attach_message_sink(ReceiverSink::new(plan.generation, plan.deliveries))
            .await?;
    }

    Ok(ConnectedLink {
        generation: plan.generation,
        receiver: Some(receiver),
        messages_attached: plan.attach_messages,
    })
}
