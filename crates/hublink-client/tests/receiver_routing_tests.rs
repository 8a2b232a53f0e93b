//! Integration tests for inbound routing
//!
//! Message subscriptions, method registration and replay, settlement,
//! receiver faults and the generation fencing that keeps items from a
//! replaced link out of the current session.


use hublink_core::{
    ClientError, ClientEvent, ConnectionState, InboundMessage, Message, MethodInvocation,
    TransportError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::{client_over, connected_client, settle, FakeTransport};
use tokio::time::timeout;

fn inbound(payload: &[u8], lock_token: &str) -> InboundMessage {
    InboundMessage::new(Message::new(payload.to_vec()), lock_token)
}

// ----------------------------------------------------------------------------
// Message Subscriptions
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_subscription_attaches_and_delivers() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    let mut sub = client.subscribe_messages().await.expect("subscribe");
    let receiver = transport.last_receiver();
    assert!(receiver.has_message_sink());

    receiver.push_message(inbound(b"hello", "lock-1"));
    let delivery = timeout(Duration::from_millis(100), sub.recv())
        .await
        .expect("delivery within timeout")
        .expect("delivery");
    assert_eq!(delivery.message.payload, b"hello");
    assert_eq!(delivery.lock_token, "lock-1");
}

#[tokio::test]
async fn test_every_subscriber_gets_every_delivery() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    let mut sub_a = client.subscribe_messages().await.expect("subscribe a");
    let mut sub_b = client.subscribe_messages().await.expect("subscribe b");
    transport.last_receiver().push_message(inbound(b"fan-out", "lock-1"));

    let first = timeout(Duration::from_millis(100), sub_a.recv())
        .await
        .expect("within timeout")
        .expect("delivery for a");
    let second = timeout(Duration::from_millis(100), sub_b.recv())
        .await
        .expect("within timeout")
        .expect("delivery for b");
    assert_eq!(first.message.message_id, second.message.message_id);
}

#[tokio::test]
async fn test_last_unsubscribe_detaches_exactly_once() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    let sub_a = client.subscribe_messages().await.expect("subscribe a");
    let sub_b = client.subscribe_messages().await.expect("subscribe b");
    let detaches = |t: &FakeTransport| t.ops().iter().filter(|op| *op == "detach").count();

    drop(sub_a);
    settle().await;
    assert_eq!(detaches(&transport), 0, "a listener remains");

    drop(sub_b);
    settle().await;
    assert_eq!(detaches(&transport), 1, "demand hit zero");
    assert!(!transport.last_receiver().has_message_sink());

    // Fresh demand re-attaches from scratch.
    let _sub_c = client.subscribe_messages().await.expect("subscribe c");
    assert!(transport.last_receiver().has_message_sink());
    assert_eq!(detaches(&transport), 1);
}

#[tokio::test]
async fn test_subscribe_before_open_auto_connects() {
    let transport = FakeTransport::new();
    let client = client_over(&transport);

    let mut sub = client.subscribe_messages().await.expect("subscribe");

    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(
        transport.ops(),
        vec!["connect", "receiver", "fault_sink", "attach"]
    );

    transport.last_receiver().push_message(inbound(b"first", "lock-1"));
    let delivery = timeout(Duration::from_millis(100), sub.recv())
        .await
        .expect("within timeout")
        .expect("delivery");
    assert_eq!(delivery.message.payload, b"first");
}

#[tokio::test]
async fn test_attach_failure_rolls_the_subscription_back() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;
    transport.script_attach(Err(TransportError::rejected("no inbound link")));

    let error = client
        .subscribe_messages()
        .await
        .expect_err("subscribe must surface the attach failure");
    assert!(error.is_transport());
    settle().await;

    // Demand is zero again, so the next subscribe attaches from scratch.
    let mut sub = client.subscribe_messages().await.expect("subscribe after rollback");
    transport.last_receiver().push_message(inbound(b"retry", "lock-2"));
    let delivery = timeout(Duration::from_millis(100), sub.recv())
        .await
        .expect("within timeout")
        .expect("delivery");
    assert_eq!(delivery.message.payload, b"retry");
}

// ----------------------------------------------------------------------------
// Settlement
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_settlement_carries_the_lock_token() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;
    let mut sub = client.subscribe_messages().await.expect("subscribe");

    transport.last_receiver().push_message(inbound(b"work", "lock-9"));
    let delivery = timeout(Duration::from_millis(100), sub.recv())
        .await
        .expect("within timeout")
        .expect("delivery");

    client.complete(delivery.clone()).await.expect("complete");
    client.reject(delivery.clone()).await.expect("reject");
    client.abandon(delivery).await.expect("abandon");

    let ops = transport.ops();
    assert!(ops.contains(&"complete:lock-9".to_string()));
    assert!(ops.contains(&"reject:lock-9".to_string()));
    assert!(ops.contains(&"abandon:lock-9".to_string()));
}

// ----------------------------------------------------------------------------
// Method Routing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_method_invocations_route_to_their_handler() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);
    client
        .register_method("reboot", move |invocation: MethodInvocation| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!(
                    "{}:{}",
                    invocation.request_id,
                    String::from_utf8_lossy(&invocation.payload)
                ));
            }
        })
        .await
        .expect("register");

    let receiver = transport.last_receiver();
    assert!(receiver.invoke(MethodInvocation::new("reboot", "req-1", b"now".to_vec())));
    settle().await;

    assert_eq!(calls.lock().unwrap().as_slice(), ["req-1:now"]);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_the_first_handler() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&calls);
    client
        .register_method("reboot", move |_invocation: MethodInvocation| {
            let first = Arc::clone(&first);
            async move { first.lock().unwrap().push("first") }
        })
        .await
        .expect("first registration");

    let second = Arc::clone(&calls);
    let error = client
        .register_method("reboot", move |_invocation: MethodInvocation| {
            let second = Arc::clone(&second);
            async move { second.lock().unwrap().push("second") }
        })
        .await
        .expect_err("second registration must be rejected");
    match error {
        ClientError::DuplicateRegistration { name } => assert_eq!(name, "reboot"),
        other => panic!("expected duplicate registration error, got {other:?}"),
    }

    transport
        .last_receiver()
        .invoke(MethodInvocation::new("reboot", "req-1", Vec::new()));
    settle().await;
    assert_eq!(calls.lock().unwrap().as_slice(), ["first"]);
}

#[tokio::test]
async fn test_bind_failure_frees_the_name() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;
    transport.script_bind(Err(TransportError::rejected("method quota")));

    let error = client
        .register_method("reboot", |_invocation: MethodInvocation| async {})
        .await
        .expect_err("bind failure must surface");
    assert!(error.is_transport());
    settle().await;

    client
        .register_method("reboot", |_invocation: MethodInvocation| async {})
        .await
        .expect("re-register once the rollback landed");
    assert_eq!(transport.last_receiver().bound_methods(), ["reboot"]);
}

#[tokio::test]
async fn test_reconnect_replays_methods_before_anything_else() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;

    client
        .register_method("reboot", |_invocation: MethodInvocation| async {})
        .await
        .expect("register reboot");
    client
        .register_method("status", |_invocation: MethodInvocation| async {})
        .await
        .expect("register status");
    let _sub = client.subscribe_messages().await.expect("subscribe");

    transport.clear_ops();
    transport.drop_link("net blip");
    settle().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    client.open().await.expect("reconnect");

    // Routes come back in registration order, message attach after them,
    // all before the connected signal let this open resolve.
    assert_eq!(
        transport.ops(),
        vec!["connect", "receiver", "fault_sink", "bind:reboot", "bind:status", "attach"]
    );
    assert_eq!(
        transport.last_receiver().bound_methods(),
        vec!["reboot", "status"]
    );
}

// ----------------------------------------------------------------------------
// Generation Fencing & Faults
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_items_from_a_replaced_link_are_dropped() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;
    let mut sub = client.subscribe_messages().await.expect("subscribe");

    let old_receiver = transport.last_receiver();
    transport.drop_link("blip");
    settle().await;
    client.open().await.expect("reconnect");
    let fresh_receiver = transport.last_receiver();

    // The old link's sink still pushes, but its generation is dead.
    old_receiver.push_message(inbound(b"stale", "old-lock"));
    fresh_receiver.push_message(inbound(b"fresh", "new-lock"));

    let delivery = timeout(Duration::from_millis(100), sub.recv())
        .await
        .expect("within timeout")
        .expect("delivery");
    assert_eq!(delivery.message.payload, b"fresh");
}

#[tokio::test]
async fn test_receiver_faults_surface_as_error_events() {
    let transport = FakeTransport::new();
    let client = connected_client(&transport).await;
    let mut events = client.subscribe_events();

    transport
        .last_receiver()
        .push_fault(TransportError::io("frame decode error"));
    settle().await;

    let event = timeout(Duration::from_millis(100), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open");
    match event {
        ClientEvent::Error(error) => {
            assert!(error.is_transport());
            assert!(error.to_string().contains("frame decode error"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
}
