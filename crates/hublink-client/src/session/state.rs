//! Session bookkeeping
//!
//! All mutable session state, owned exclusively by the session task: the
//! connection state (published through a watch channel), the FIFO queue of
//! operations parked behind an in-flight transition, the transition and
//! generation counters, and the bridge/registry bookkeeping.

use crate::bridge::ReceiverBridge;
use crate::methods::MethodRegistry;
use crate::session::commands::ClientCommand;
use hublink_core::{ConnectionGeneration, ConnectionState};
use std::collections::VecDeque;
use tokio::sync::watch;
use tracing::{debug, info};

pub(crate) struct SessionState {
    state: ConnectionState,
    /// Operations deferred until the in-flight transition settles. Strictly
    /// FIFO; the one exception is the token-renewal chain, which parks its
    /// initiator at the front so it settles with the chained reconnect.
    pending: VecDeque<ClientCommand>,
    /// Sequence of the most recently spawned transition. An outcome
    /// carrying any other sequence is stale and dropped.
    transition_seq: u64,
    /// Last generation handed to a connect transition. Becomes live only
    /// if that connect succeeds.
    minted: ConnectionGeneration,
    /// Generation of the current link, if one is up. Receiver items
    /// stamped with anything else are stale.
    live: Option<ConnectionGeneration>,
    pub bridge: ReceiverBridge,
    pub registry: MethodRegistry,
    state_tx: watch::Sender<ConnectionState>,
}

impl SessionState {
    pub fn new(state_tx: watch::Sender<ConnectionState>) -> Self {
        SessionState {
            state: ConnectionState::Disconnected,
            pending: VecDeque::new(),
            transition_seq: 0,
            minted: ConnectionGeneration::INITIAL,
            live: None,
            bridge: ReceiverBridge::new(),
            registry: MethodRegistry::new(),
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        let _ = self.state_tx.send(next);
    }

    /// Claim the sequence number for a transition about to be spawned.
    pub fn begin_transition(&mut self) -> u64 {
        self.transition_seq += 1;
        self.transition_seq
    }

    pub fn is_current_transition(&self, seq: u64) -> bool {
        self.transition_seq == seq
    }

    /// Generation for the next connect attempt.
    pub fn mint_generation(&mut self) -> ConnectionGeneration {
        self.minted = self.minted.next();
        self.minted
    }

    pub fn mark_link_up(&mut self, generation: ConnectionGeneration) {
        self.live = Some(generation);
    }

    pub fn mark_link_down(&mut self) {
        self.live = None;
    }

    pub fn live_generation(&self) -> Option<ConnectionGeneration> {
        self.live
    }

    pub fn enqueue(&mut self, command: ClientCommand) {
        debug!(operation = command.name(), depth = self.pending.len() + 1, "operation queued");
        self.pending.push_back(command);
    }

    /// Park an operation ahead of everything already queued.
    pub fn enqueue_front(&mut self, command: ClientCommand) {
        self.pending.push_front(command);
    }

    pub fn next_pending(&mut self) -> Option<ClientCommand> {
        self.pending.pop_front()
    }

    /// Empty the queue, handing every parked operation to the caller.
    pub fn take_pending(&mut self) -> VecDeque<ClientCommand> {
        std::mem::take(&mut self.pending)
    }

    /// Queue depth (for testing)
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
