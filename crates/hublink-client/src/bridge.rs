//! Receiver bridge
//!
//! Book-keeping for external message listeners. Many listeners share one
//! underlying receiver attachment: the first subscriber triggers the
//! attach, later ones piggyback, and the attachment is released exactly
//! once when the last subscriber goes away. Attachment state is tracked
//! per link; it resets whenever the link is lost.

use hublink_core::InboundMessage;
use smallvec::SmallVec;
use tokio::sync::mpsc;

/// Identifies one message subscription for unsubscribe-on-drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) struct ReceiverBridge {
    subscribers: SmallVec<[(SubscriptionId, mpsc::UnboundedSender<InboundMessage>); 2]>,
    attached: bool,
    next_id: u64,
}

impl ReceiverBridge {
    pub fn new() -> Self {
        ReceiverBridge {
            subscribers: SmallVec::new(),
            attached: false,
            next_id: 0,
        }
    }

    pub fn add(&mut self, sink: mpsc::UnboundedSender<InboundMessage>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, sink));
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }

    pub fn has_demand(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Current subscriber total (for testing)
    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether the message sink is attached on the current receiver.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    /// The link is gone; any attachment went with it.
    pub fn reset_attachment(&mut self) {
        self.attached = false;
    }

    /// Fan one delivery out to every live subscriber, pruning subscribers
    /// whose receiving half is gone. Returns how many copies were sent.
    pub fn dispatch(&mut self, message: InboundMessage) -> usize {
        self.subscribers
            .retain(|(_, sink)| sink.send(message.clone()).is_ok());
        self.subscribers.len()
    }
}
