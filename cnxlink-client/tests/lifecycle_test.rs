//! Connection lifecycle integration tests
//!
//! Identity persistence, gating of calls while the link is down, and
//! reconciliation after a reconnect, driven through the in-process harness
//! with a paused clock.

mod common;

use cnxlink_client::{ClientBuilder, Error, FixedDelay, LinkState, ReconcileMode, SledIdentityStore};
use common::{id, uid_of, Harness};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_first_connection_sends_without_delay() {
    let mut harness = Harness::new();
    assert_eq!(harness.stored(), None);

    harness.connect(7).await;
    assert_eq!(harness.stored(), Some(id(7)));

    let start = tokio::time::Instant::now();
    let user = harness.client.service("User");
    let call = tokio::spawn(async move { user.call("find", vec![]).await });

    let request = harness.next_outgoing().await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    harness.respond(&uid_of(&request), json!(true)).await;
    assert_eq!(call.await.unwrap().unwrap(), json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_call_while_down_times_out_unsent() {
    let mut harness = Harness::new();
    harness.connect(7).await;
    harness.disconnect().await;
    assert_eq!(harness.stored(), Some(id(-7)));

    let start = tokio::time::Instant::now();
    let error = harness
        .client
        .service("User")
        .call("find", vec![])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::ReconnectionTimeout { attempts: 10 }));
    assert_eq!(start.elapsed(), Duration::from_millis(2000));
    assert!(harness.try_outgoing().is_none());
    assert_eq!(harness.client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_call_before_first_connection_is_gated() {
    let mut harness = Harness::new();

    let error = harness.client.service("User").call("find", vec![]).await.unwrap_err();

    assert!(error.is_reconnection_timeout());
    assert!(harness.try_outgoing().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_call_released_by_reconnect() {
    let mut harness = Harness::with_stored(-7, ReconcileMode::Immediate);

    let user = harness.client.service("User");
    let call = tokio::spawn(async move { user.call("find", vec![json!(1)]).await });

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(harness.try_outgoing().is_none());

    harness.connect(9).await;

    let transfer = harness.next_outgoing().await;
    assert_eq!(transfer.event, "cnx-transfer");
    assert_eq!(transfer.data, json!({"from": 7, "to": 9}));

    let request = harness.next_outgoing().await;
    assert_eq!(request.event, "client-request");
    harness.respond(&uid_of(&request), json!("found")).await;

    assert_eq!(call.await.unwrap().unwrap(), json!("found"));
}

#[tokio::test]
async fn test_transfer_immediate() {
    let mut harness = Harness::with_stored(-7, ReconcileMode::Immediate);

    harness.connect(9).await;

    let transfer = harness.next_outgoing().await;
    assert_eq!(transfer.event, "cnx-transfer");
    assert_eq!(transfer.data, json!({"from": 7, "to": 9}));
    assert_eq!(harness.stored(), Some(id(9)));

    // The ack for the committed identity is harmless.
    harness.deliver("cnx-transfer-ack", json!(9)).await;
    assert_eq!(harness.stored(), Some(id(9)));
}

#[tokio::test(start_paused = true)]
async fn test_transfer_await_ack() {
    let mut harness = Harness::with_stored(-7, ReconcileMode::AwaitAck);

    harness.connect(9).await;
    assert_eq!(
        harness.next_outgoing().await.data,
        json!({"from": 7, "to": 9})
    );
    assert_eq!(harness.stored(), Some(id(-7)));
    assert_eq!(
        harness.client.link_state().unwrap(),
        LinkState::Disconnected(id(7))
    );

    // Calls still wait for the ack.
    let user = harness.client.service("User");
    let call = tokio::spawn(async move { user.call("find", vec![]).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.try_outgoing().is_none());

    harness.deliver("cnx-transfer-ack", json!("9")).await;
    assert_eq!(harness.stored(), Some(id(9)));

    let request = harness.next_outgoing().await;
    harness.respond(&uid_of(&request), json!(1)).await;
    assert_eq!(call.await.unwrap().unwrap(), json!(1));
}

#[tokio::test]
async fn test_stale_ack_is_ignored() {
    let mut harness = Harness::with_stored(-7, ReconcileMode::AwaitAck);

    harness.connect(9).await;
    harness.disconnect().await;
    harness.connect(11).await;

    assert_eq!(harness.next_outgoing().await.data, json!({"from": 7, "to": 9}));
    assert_eq!(harness.next_outgoing().await.data, json!({"from": 7, "to": 11}));

    harness.deliver("cnx-transfer-ack", json!(9)).await;
    assert_eq!(harness.stored(), Some(id(-7)));

    harness.deliver("cnx-transfer-ack", json!(11)).await;
    assert_eq!(harness.stored(), Some(id(11)));
}

#[tokio::test]
async fn test_identity_left_live_by_crash_is_transferred() {
    let mut harness = Harness::with_stored(7, ReconcileMode::Immediate);
    assert_eq!(harness.stored(), Some(id(-7)));
    assert_eq!(harness.client.link_state().unwrap(), LinkState::Disconnected(id(7)));

    harness.connect(9).await;

    let transfer = harness.next_outgoing().await;
    assert_eq!(transfer.event, "cnx-transfer");
    assert_eq!(transfer.data, json!({"from": 7, "to": 9}));
    assert_eq!(harness.stored(), Some(id(9)));
}

#[tokio::test(start_paused = true)]
async fn test_identity_left_live_by_crash_gates_calls() {
    let mut harness = Harness::with_stored(7, ReconcileMode::Immediate);

    let error = harness
        .client
        .service("User")
        .call("find", vec![])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::ReconnectionTimeout { attempts: 10 }));
    assert!(harness.try_outgoing().is_none());
}

#[tokio::test]
async fn test_duplicate_connected_event() {
    let harness = Harness::new();
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connects);
    harness.client.set_connection_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    harness.connect(7).await;
    harness.connect(7).await;

    assert_eq!(harness.stored(), Some(id(7)));
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_callbacks_track_transitions() {
    let harness = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let entries = Arc::clone(&log);
    harness
        .client
        .set_connection_callback(move |id| entries.lock().unwrap().push(format!("up {}", id)));
    let entries = Arc::clone(&log);
    harness
        .client
        .set_disconnection_callback(move |id| entries.lock().unwrap().push(format!("down {}", id)));

    harness.connect(7).await;
    harness.disconnect().await;
    harness.connect(9).await;
    harness.client.unload().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["up 7", "down 7", "up 9", "down 9"]
    );
    assert_eq!(harness.stored(), Some(id(-9)));
}

#[tokio::test]
async fn test_disconnect_while_down_leaves_store() {
    let harness = Harness::with_stored(-7, ReconcileMode::Immediate);

    harness.disconnect().await;
    harness.client.unload().unwrap();

    assert_eq!(harness.stored(), Some(id(-7)));
}

#[tokio::test(start_paused = true)]
async fn test_custom_gate() {
    let mut harness = Harness::with_builder(
        Some(-7),
        ClientBuilder::new().with_gate(Arc::new(FixedDelay::new(Duration::from_millis(50)).with_max_attempts(3))),
    );

    let start = tokio::time::Instant::now();
    let error = harness.client.wait_until_live().await.unwrap_err();

    assert!(matches!(error, Error::ReconnectionTimeout { attempts: 3 }));
    assert_eq!(start.elapsed(), Duration::from_millis(150));
    assert!(harness.try_outgoing().is_none());
}

#[tokio::test]
async fn test_durable_identity_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cnx-state");

    {
        let (transport, _rx) = cnxlink_client::ChannelTransport::new();
        let store = Arc::new(SledIdentityStore::open(&path).unwrap());
        let client = ClientBuilder::new()
            .with_identity_store(store)
            .build(Arc::new(transport))
            .unwrap();

        client
            .handle_signal(cnxlink_client::TransportSignal::Inbound(
                cnxlink_core::Envelope::new("connected", &json!(7)).unwrap(),
            ))
            .await;
        client.unload().unwrap();
    }

    let (transport, mut rx) = cnxlink_client::ChannelTransport::new();
    let store = Arc::new(SledIdentityStore::open(&path).unwrap());
    let client = ClientBuilder::new()
        .with_identity_store(store)
        .build(Arc::new(transport))
        .unwrap();
    assert_eq!(client.link_state().unwrap(), LinkState::Disconnected(id(7)));

    client
        .handle_signal(cnxlink_client::TransportSignal::Inbound(
            cnxlink_core::Envelope::new("connected", &json!(12)).unwrap(),
        ))
        .await;

    let transfer = rx.recv().await.unwrap();
    assert_eq!(transfer.data, json!({"from": 7, "to": 12}));
    assert_eq!(client.link_state().unwrap(), LinkState::Connected(id(12)));
}
