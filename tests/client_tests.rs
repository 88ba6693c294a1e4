#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style tests for `LiveSyncClient`.
//!
//! Uses the `ScriptedConnector` and `MockServer` from `tests/common` to drive
//! connection lifecycles and verify state transitions, room replay,
//! notification output, and handler dispatch.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use live_sync_client::{
    AuthState, ClientConfig, ConnectionState, EventKind, LiveSyncClient, LiveSyncError,
    Notification, ServerEvent, SessionGate, Severity,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};

use common::{
    fast_config, identity, next_notification, wait_for_state, wait_until, ScriptedConnector,
};

// ════════════════════════════════════════════════════════════════════
// Helper: start a client and connect it
// ════════════════════════════════════════════════════════════════════

fn start(connector: &ScriptedConnector) -> (LiveSyncClient, mpsc::Receiver<Notification>) {
    LiveSyncClient::new(connector.clone(), fast_config())
}

/// Connect and wait for the success notification, which is published after
/// the subscription replay.
async fn connect_and_settle(
    client: &LiveSyncClient,
    notifications: &mut mpsc::Receiver<Notification>,
) {
    client.connect(identity("user-1")).unwrap();
    let n = next_notification(notifications).await;
    assert_eq!(n.severity, Severity::Success, "unexpected notification {n:?}");
    assert_eq!(n.message, "Connected to real-time updates");
    assert!(client.is_connected());
}

fn joins(events: &[(String, serde_json::Value)]) -> Vec<String> {
    events
        .iter()
        .map(|(event, data)| match data.as_str() {
            Some(id) => format!("{event}:{id}"),
            None => event.clone(),
        })
        .collect()
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connect_joins_general_channel_and_reports_success() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    assert_eq!(client.state(), ConnectionState::Disconnected);
    connect_and_settle(&client, &mut notifications).await;

    let server = connector.server(0);
    assert_eq!(joins(&server.sent_events()), vec!["join_general"]);
    assert_eq!(connector.identities()[0].user_id(), "user-1");
    assert_eq!(connector.identities()[0].credential(), "token-for-user-1");

    client.shutdown().await;
    assert!(server.is_closed());
}

#[tokio::test]
async fn repeated_connect_opens_a_single_connection() {
    let connector = ScriptedConnector::new().accept(3);
    let (client, mut notifications) = start(&connector);

    connect_and_settle(&client, &mut notifications).await;
    client.connect(identity("user-1")).unwrap();
    client.connect(identity("user-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(connector.attempts(), 1);
    assert!(notifications.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn connect_while_attempt_pending_is_a_no_op() {
    let connector = ScriptedConnector::new()
        .accept(2)
        .with_delay(Duration::from_millis(50));
    let (client, mut notifications) = start(&connector);

    client.connect(identity("user-1")).unwrap();
    client.connect(identity("user-1")).unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);

    let n = next_notification(&mut notifications).await;
    assert_eq!(n.message, "Connected to real-time updates");
    assert_eq!(connector.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn always_failing_connector_gives_up_after_ceiling() {
    let connector = ScriptedConnector::new();
    let (client, mut notifications) = start(&connector);

    client.connect(identity("user-1")).unwrap();

    for attempt in 1..=5 {
        let n = next_notification(&mut notifications).await;
        assert_eq!(n.severity, Severity::Warning);
        assert_eq!(
            n.message,
            format!("Connection lost. Retrying... ({attempt}/5)")
        );
    }
    let last = next_notification(&mut notifications).await;
    assert_eq!(last.severity, Severity::Urgent);
    assert!(last.message.starts_with("Unable to connect to real-time updates"));

    wait_for_state(&client, ConnectionState::Failed).await;
    // The first attempt plus five automatic ones.
    assert_eq!(connector.attempts(), 6);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(connector.attempts(), 6);
    assert!(notifications.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn connect_after_failure_starts_a_fresh_session() {
    let connector = ScriptedConnector::new();
    let config = fast_config().with_max_reconnect_attempts(1);
    let (client, mut notifications) = LiveSyncClient::new(connector.clone(), config);

    client.connect(identity("user-1")).unwrap();
    let warning = next_notification(&mut notifications).await;
    assert_eq!(warning.message, "Connection lost. Retrying... (1/1)");
    let gave_up = next_notification(&mut notifications).await;
    assert_eq!(gave_up.severity, Severity::Urgent);
    wait_for_state(&client, ConnectionState::Failed).await;
    assert_eq!(connector.attempts(), 2);

    let connector = connector.accept(1);
    connect_and_settle(&client, &mut notifications).await;
    assert_eq!(connector.attempts(), 3);
    client.shutdown().await;
}

#[tokio::test]
async fn success_resets_attempt_counter() {
    let connector = ScriptedConnector::new().reject(2).accept(1).reject(2).accept(1);
    let (client, mut notifications) = start(&connector);

    client.connect(identity("user-1")).unwrap();
    let messages: Vec<String> = {
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next_notification(&mut notifications).await.message);
        }
        seen
    };
    assert_eq!(
        messages,
        vec![
            "Connection lost. Retrying... (1/5)",
            "Connection lost. Retrying... (2/5)",
            "Connected to real-time updates",
        ]
    );

    // Each remote close after a success counts from one again.
    connector.server(0).hang_up();
    let first = next_notification(&mut notifications).await;
    assert_eq!(first.message, "Connection lost. Retrying... (1/5)");
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Local stop
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn disconnect_is_synchronous_and_never_reconnects() {
    let connector = ScriptedConnector::new().accept(2);
    let (client, mut notifications) = start(&connector);
    connect_and_settle(&client, &mut notifications).await;

    client.join_room("r1");
    let server = connector.server(0);
    server.push("user_count", json!(4));
    wait_until(|| client.online_count() == 4).await;

    client.disconnect();
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.online_count(), 0);
    assert!(client.joined_rooms().is_empty());

    wait_until(|| server.is_closed()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(notifications.try_recv().is_err());

    // Idempotent.
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_cancels_a_slow_attempt() {
    let connector = ScriptedConnector::new()
        .accept(1)
        .with_delay(Duration::from_millis(100));
    let (client, mut notifications) = start(&connector);

    client.connect(identity("user-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(connector.accepted(), 0);
    assert!(notifications.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_the_retry() {
    let connector = ScriptedConnector::new().reject(1).accept(1);
    let config = ClientConfig::default()
        .with_reconnect_delay(Duration::from_millis(100), Duration::from_millis(100));
    let (client, mut notifications) = LiveSyncClient::new(connector.clone(), config);

    client.join_room("r1");
    client.connect(identity("user-1")).unwrap();
    let n = next_notification(&mut notifications).await;
    assert_eq!(n.severity, Severity::Warning);
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert_eq!(client.joined_rooms(), vec!["r1"]);

    client.disconnect();
    assert!(client.joined_rooms().is_empty());
    assert_eq!(client.online_count(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(notifications.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_after_failure_clears_rooms() {
    let connector = ScriptedConnector::new();
    let config = fast_config().with_max_reconnect_attempts(1);
    let (client, mut notifications) = LiveSyncClient::new(connector.clone(), config);

    client.join_room("r1");
    client.connect(identity("user-1")).unwrap();
    let warning = next_notification(&mut notifications).await;
    assert_eq!(warning.severity, Severity::Warning);
    let gave_up = next_notification(&mut notifications).await;
    assert_eq!(gave_up.severity, Severity::Urgent);
    wait_for_state(&client, ConnectionState::Failed).await;
    assert_eq!(client.joined_rooms(), vec!["r1"]);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.joined_rooms().is_empty());
    assert_eq!(client.online_count(), 0);

    // Nothing is replayed on the next session.
    let connector = connector.accept(1);
    connect_and_settle(&client, &mut notifications).await;
    let server = connector.server(0);
    assert_eq!(joins(&server.sent_events()), vec!["join_general"]);
    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_during_replay_suppresses_success_notification() {
    let connector = ScriptedConnector::new()
        .accept(1)
        .with_send_delay(Duration::from_millis(100));
    let (client, mut notifications) = start(&connector);

    client.join_room("r1");
    client.connect(identity("user-1")).unwrap();
    // Connected is committed before the replay sends go out.
    wait_for_state(&client, ConnectionState::Connected).await;
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let server = connector.server(0);
    wait_until(|| server.is_closed()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        notifications.try_recv().is_err(),
        "no notification may follow a local stop"
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 1);
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Rooms
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn offline_join_is_replayed_on_connect() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    client.join_room("r1");
    client.join_room("r2");
    assert_eq!(client.joined_rooms(), vec!["r1", "r2"]);

    connect_and_settle(&client, &mut notifications).await;
    assert_eq!(
        joins(&connector.server(0).sent_events()),
        vec!["join_general", "join_disaster:r1", "join_disaster:r2"]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn room_is_rejoined_exactly_once_after_remote_close() {
    let connector = ScriptedConnector::new().accept(2);
    let (client, mut notifications) = start(&connector);
    connect_and_settle(&client, &mut notifications).await;

    client.join_room("r1");
    client.join_room("r1");
    let first = connector.server(0);
    wait_until(|| first.sent().len() == 2).await;
    assert_eq!(
        joins(&first.sent_events()),
        vec!["join_general", "join_disaster:r1"]
    );

    first.hang_up();
    let n = next_notification(&mut notifications).await;
    assert_eq!(n.message, "Connection lost. Retrying... (1/5)");
    let n = next_notification(&mut notifications).await;
    assert_eq!(n.message, "Connected to real-time updates");

    let second = connector.server(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        joins(&second.sent_events()),
        vec!["join_general", "join_disaster:r1"]
    );
    assert_eq!(client.joined_rooms(), vec!["r1"]);
    client.shutdown().await;
}

#[tokio::test]
async fn leave_room_online_and_offline() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    client.join_room("r1");
    client.join_room("r2");
    client.leave_room("r2");
    client.leave_room("never-joined");
    assert_eq!(client.joined_rooms(), vec!["r1"]);

    connect_and_settle(&client, &mut notifications).await;
    client.leave_room("r1");
    let server = connector.server(0);
    wait_until(|| server.sent().len() == 3).await;
    assert_eq!(
        joins(&server.sent_events()),
        vec!["join_general", "join_disaster:r1", "leave_disaster:r1"]
    );
    assert!(client.joined_rooms().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn empty_room_id_is_ignored() {
    let connector = ScriptedConnector::new();
    let (client, _notifications) = start(&connector);
    client.join_room("");
    assert!(client.joined_rooms().is_empty());
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Inbound events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handlers_run_in_registration_order_until_removed() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    let calls = Arc::new(StdMutex::new(Vec::new()));
    let log = Arc::clone(&calls);
    let first = client.on(EventKind::DisasterUpdated, move |_| {
        log.lock().unwrap().push("first");
    });
    let log = Arc::clone(&calls);
    let _second = client.on("disaster_updated", move |_| {
        log.lock().unwrap().push("second");
    });

    connect_and_settle(&client, &mut notifications).await;
    let server = connector.server(0);
    server.push("disaster_updated", json!({"type": "update", "data": {"id": "d1"}}));
    wait_until(|| calls.lock().unwrap().len() == 2).await;
    assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);

    client.off(&first);
    server.push("disaster_updated", json!({"type": "delete"}));
    wait_until(|| calls.lock().unwrap().len() == 3).await;
    assert_eq!(calls.lock().unwrap()[2], "second");
    client.shutdown().await;
}

#[tokio::test]
async fn unknown_event_reaches_handlers_by_name() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    let seen = Arc::new(StdMutex::new(None));
    let slot = Arc::clone(&seen);
    client.on("shelter_opened", move |event| {
        *slot.lock().unwrap() = Some(event.clone());
    });

    connect_and_settle(&client, &mut notifications).await;
    connector
        .server(0)
        .push("shelter_opened", json!({"capacity": 120}));
    wait_until(|| seen.lock().unwrap().is_some()).await;

    let event = seen.lock().unwrap().clone().unwrap();
    assert_eq!(
        event,
        ServerEvent::Unknown {
            name: "shelter_opened".into(),
            payload: json!({"capacity": 120}),
        }
    );
    assert!(notifications.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn domain_events_become_notifications() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);
    connect_and_settle(&client, &mut notifications).await;

    let server = connector.server(0);
    server.push(
        "disaster_updated",
        json!({"type": "create", "data": {"title": "Flood A"}}),
    );
    server.push(
        "social_media_updated",
        json!({"posts": [{"priority": "urgent"}, {"priority": "urgent"}, {"priority": "low"}]}),
    );
    server.push("urgent_notification", json!({"message": "Evacuate zone 3"}));

    let n = next_notification(&mut notifications).await;
    assert_eq!(n.severity, Severity::Urgent);
    assert_eq!(n.message, "New disaster reported: Flood A");

    let n = next_notification(&mut notifications).await;
    assert_eq!(n.message, "2 urgent social media alerts detected!");

    let n = next_notification(&mut notifications).await;
    assert_eq!(n.message, "URGENT: Evacuate zone 3");
    assert_eq!(n.duration, Duration::from_secs(10));
    client.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_without_losing_the_connection() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);
    connect_and_settle(&client, &mut notifications).await;

    let server = connector.server(0);
    server.push_raw("definitely not json");
    server.push_raw(r#"{"data": 1}"#);
    server.push("user_count", json!(3));

    wait_until(|| client.online_count() == 3).await;
    assert!(client.is_connected());
    assert_eq!(connector.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn online_count_tracks_pushes_and_resets_on_drop() {
    let connector = ScriptedConnector::new().accept(2);
    let (client, mut notifications) = start(&connector);
    connect_and_settle(&client, &mut notifications).await;

    let mut status = client.watch_status();
    let server = connector.server(0);
    server.push("user_count", json!(12));
    tokio::time::timeout(common::WAIT, status.wait_for(|s| s.online_count == 12))
        .await
        .unwrap()
        .unwrap();

    server.fail("socket reset");
    wait_until(|| connector.accepted() == 2).await;
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(client.online_count(), 0);
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Outbound events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn emit_is_best_effort() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    client
        .emit("report_submitted", &json!({"id": 1}))
        .expect("emit while disconnected is not an error");

    connect_and_settle(&client, &mut notifications).await;
    client.emit("report_submitted", &json!({"id": 2})).unwrap();

    let server = connector.server(0);
    wait_until(|| server.sent().len() == 2).await;
    let sent = server.sent_events();
    assert_eq!(sent[0].0, "join_general");
    assert_eq!(sent[1], ("report_submitted".to_string(), json!({"id": 2})));
    client.shutdown().await;
}

#[tokio::test]
async fn emit_while_disconnected_skips_serialization() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, mut notifications) = start(&connector);

    // Tuple keys cannot become JSON object keys.
    let payload: HashMap<(i32, i32), i32> = HashMap::from([((1, 2), 3)]);
    client
        .emit("grid_update", &payload)
        .expect("offline emit drops the event without serializing it");

    connect_and_settle(&client, &mut notifications).await;
    let err = client.emit("grid_update", &payload).unwrap_err();
    assert!(matches!(err, LiveSyncError::Serialization(_)), "got {err:?}");
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Session gate
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn session_gate_follows_authentication() {
    let connector = ScriptedConnector::new().accept(2);
    let (client, _notifications) = start(&connector);
    let (auth_tx, auth_rx) = watch::channel(AuthState::signed_out());
    let gate = SessionGate::new(client.clone()).spawn(auth_rx);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.attempts(), 0);

    auth_tx.send_replace(AuthState::signed_in(identity("alice")));
    wait_for_state(&client, ConnectionState::Connected).await;

    // The same identity observed again changes nothing.
    auth_tx.send_replace(AuthState::signed_in(identity("alice")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.attempts(), 1);

    // A different user restarts the connection under the new identity.
    auth_tx.send_replace(AuthState::signed_in(identity("bob")));
    wait_until(|| connector.accepted() == 2).await;
    wait_for_state(&client, ConnectionState::Connected).await;
    let users: Vec<String> = connector
        .identities()
        .iter()
        .map(|i| i.user_id().to_owned())
        .collect();
    assert_eq!(users, vec!["alice", "bob"]);
    assert!(connector.server(0).is_closed());

    auth_tx.send_replace(AuthState::signed_out());
    wait_for_state(&client, ConnectionState::Disconnected).await;

    drop(auth_tx);
    gate.await.unwrap().unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn session_gate_disconnects_when_auth_source_goes_away() {
    let connector = ScriptedConnector::new().accept(1);
    let (client, _notifications) = start(&connector);
    let (auth_tx, auth_rx) = watch::channel(AuthState::signed_in(identity("alice")));
    let gate = SessionGate::new(client.clone()).spawn(auth_rx);

    wait_for_state(&client, ConnectionState::Connected).await;
    drop(auth_tx);
    gate.await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.shutdown().await;
}
