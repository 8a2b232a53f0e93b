//! Serialized receiver mutations
//!
//! The receiver bridge and the method registry are the only components that
//! touch a receiver, and their attach/detach/bind calls for one generation
//! all flow through a single worker here, so the order the session task
//! issues them is the order the receiver sees them. Each successful connect
//! spawns a fresh worker; dropping the handle lets the previous worker
//! drain and exit with its obsolete receiver.

use crate::bridge::SubscriptionId;
use crate::session::commands::{Responder, SessionEvent, SubscribeResponder};
use hublink_core::{ClientError, ConnectionGeneration, DeliverySink, MethodSink, Receiver};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

// ----------------------------------------------------------------------------
// Receiver Operations
// ----------------------------------------------------------------------------

pub(crate) enum ReceiverOp {
    /// Attach the message sink. Carries the triggering subscriber's
    /// responder when a subscribe is waiting on the attach.
    AttachMessages {
        sink: DeliverySink,
        reply: Option<(SubscriptionId, SubscribeResponder)>,
    },
    /// Detach the message sink; issued once when demand reaches zero.
    DetachMessages,
    /// Bind a method route for a fresh registration.
    BindMethod {
        name: String,
        sink: MethodSink,
        reply: Responder,
    },
}

/// Failure descriptor reported back to the session task so it can roll
/// back the matching bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReceiverOpKind {
    AttachMessages { subscriber: Option<SubscriptionId> },
    DetachMessages,
    BindMethod { name: String },
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Sender half of the per-generation worker. Dropping it ends the worker
/// once queued operations have drained.
pub(crate) struct ReceiverOpsHandle {
    tx: mpsc::UnboundedSender<ReceiverOp>,
}

impl ReceiverOpsHandle {
    pub fn spawn(
        receiver: Arc<dyn Receiver>,
        generation: ConnectionGeneration,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_receiver_ops(receiver, generation, rx, events));
        ReceiverOpsHandle { tx }
    }

    pub fn push(&self, op: ReceiverOp) {
        // A closed worker means the generation was already replaced.
        let _ = self.tx.send(op);
    }
}

async fn run_receiver_ops(
    receiver: Arc<dyn Receiver>,
    generation: ConnectionGeneration,
    mut ops: mpsc::UnboundedReceiver<ReceiverOp>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            ReceiverOp::AttachMessages { sink, reply } => {
                match receiver.attach_message_sink(sink).await {
                    Ok(()) => {
                        if let Some((id, reply)) = reply {
                            let _ = reply.send(Ok(id));
                        }
                    }
                    Err(error) => {
                        let error = Arc::new(error);
                        let subscriber = reply.as_ref().map(|(id, _)| *id);
                        let answered = match reply {
                            Some((_, reply)) => {
                                let _ = reply.send(Err(ClientError::Transport(Arc::clone(&error))));
                                true
                            }
                            None => false,
                        };
                        let _ = events.send(SessionEvent::ReceiverOpFailed {
                            generation,
                            op: ReceiverOpKind::AttachMessages { subscriber },
                            error,
                            answered,
                        });
                    }
                }
            }
            ReceiverOp::DetachMessages => {
                if let Err(error) = receiver.detach_message_sink().await {
                    let _ = events.send(SessionEvent::ReceiverOpFailed {
                        generation,
                        op: ReceiverOpKind::DetachMessages,
                        error: Arc::new(error),
                        answered: false,
                    });
                }
            }
            ReceiverOp::BindMethod { name, sink, reply } => {
                match receiver.bind_method(&name, sink).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(error) => {
                        let error = Arc::new(error);
                        let _ = reply.send(Err(ClientError::Transport(Arc::clone(&error))));
                        let _ = events.send(SessionEvent::ReceiverOpFailed {
                            generation,
                            op: ReceiverOpKind::BindMethod { name },
                            error,
                            answered: true,
                        });
                    }
                }
            }
        }
    }
    debug!(%generation, "receiver-op worker drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hublink_core::{ReceiverSink, TransportError, TransportResult};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct RecordingReceiver {
        calls: Mutex<Vec<String>>,
        fail_binds: bool,
    }

    impl RecordingReceiver {
        fn new(fail_binds: bool) -> Arc<Self> {
            Arc::new(RecordingReceiver {
                calls: Mutex::new(Vec::new()),
                fail_binds,
            })
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl Receiver for RecordingReceiver {
        async fn attach_message_sink(&self, _sink: DeliverySink) -> TransportResult<()> {
            self.record("attach");
            Ok(())
        }

        async fn detach_message_sink(&self) -> TransportResult<()> {
            self.record("detach");
            Ok(())
        }

        async fn bind_method(&self, name: &str, _sink: MethodSink) -> TransportResult<()> {
            self.record(format!("bind:{name}"));
            if self.fail_binds {
                Err(TransportError::rejected("bind refused"))
            } else {
                Ok(())
            }
        }

        fn attach_fault_sink(&self, _sink: hublink_core::FaultSink) {}
    }

    fn sinks() -> (DeliverySink, MethodSink) {
        let generation = ConnectionGeneration::INITIAL.next();
        let (delivery_tx, _delivery_rx) = mpsc::unbounded_channel();
        let (method_tx, _method_rx) = mpsc::unbounded_channel();
        (
            ReceiverSink::new(generation, delivery_tx),
            ReceiverSink::new(generation, method_tx),
        )
    }

    #[tokio::test]
    async fn test_operations_run_in_push_order() {
        let receiver = RecordingReceiver::new(false);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let handle = ReceiverOpsHandle::spawn(
            Arc::clone(&receiver) as Arc<dyn Receiver>,
            ConnectionGeneration::INITIAL.next(),
            events_tx,
        );

        let (delivery_sink, method_sink) = sinks();
        let (bind_reply, bind_done) = oneshot::channel();
        handle.push(ReceiverOp::BindMethod {
            name: "reboot".into(),
            sink: method_sink,
            reply: bind_reply,
        });
        handle.push(ReceiverOp::AttachMessages {
            sink: delivery_sink,
            reply: None,
        });
        handle.push(ReceiverOp::DetachMessages);

        // Dropping the handle lets the worker drain and exit.
        drop(handle);
        bind_done.await.unwrap().unwrap();
        tokio::task::yield_now().await;

        let calls = receiver.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["bind:reboot", "attach", "detach"]);
    }

    #[tokio::test]
    async fn test_bind_failure_answers_caller_and_reports_rollback() {
        let receiver = RecordingReceiver::new(true);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let generation = ConnectionGeneration::INITIAL.next();
        let handle = ReceiverOpsHandle::spawn(
            Arc::clone(&receiver) as Arc<dyn Receiver>,
            generation,
            events_tx,
        );

        let (_, method_sink) = sinks();
        let (bind_reply, bind_done) = oneshot::channel();
        handle.push(ReceiverOp::BindMethod {
            name: "reboot".into(),
            sink: method_sink,
            reply: bind_reply,
        });

        let err = bind_done.await.unwrap().unwrap_err();
        assert!(err.is_transport());

        match events_rx.recv().await {
            Some(SessionEvent::ReceiverOpFailed {
                generation: failed_generation,
                op,
                answered,
                ..
            }) => {
                assert_eq!(failed_generation, generation);
                assert!(answered);
                assert_eq!(
                    op,
                    ReceiverOpKind::BindMethod {
                        name: "reboot".into()
                    }
                );
            }
            _ => panic!("expected a receiver-op failure event"),
        }
    }
}
