use super::*;
use crate::event::{EVENT_ERROR, EVENT_PRESENCE};
use crate::state::test_helpers;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as TungMessage;

async fn recv_queued(rx: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("queued event receive timed out")
        .expect("queue closed unexpectedly")
}

async fn assert_nothing_queued(rx: &mut mpsc::Receiver<Event>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no queued event"
    );
}

fn send_message_text(data: serde_json::Value) -> String {
    json!({ "event": "send_message", "data": data }).to_string()
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn invalid_json_returns_error_event() {
    let state = test_helpers::test_app_state();
    let replies = process_inbound_text(&state, Uuid::new_v4(), None, "{not json").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].event, EVENT_ERROR);
    assert_eq!(replies[0].str_field("code"), Some("E_INVALID_EVENT"));
}

#[tokio::test]
async fn unknown_event_returns_error_event() {
    let state = test_helpers::test_app_state();
    let text = json!({ "event": "dance" }).to_string();
    let replies = process_inbound_text(&state, Uuid::new_v4(), None, &text).await;
    assert_eq!(replies[0].str_field("code"), Some("E_UNKNOWN_EVENT"));
}

#[tokio::test]
async fn broadcast_send_message_reaches_every_connection_including_sender() {
    let state = test_helpers::test_app_state();
    let (sender_id, mut sender_rx) = test_helpers::attach_connection(&state, None, 8).await;
    let (_, mut peer_rx) = test_helpers::attach_connection(&state, None, 8).await;

    let text = send_message_text(json!({ "user": "ana", "message": "hi" }));
    let replies = process_inbound_text(&state, sender_id, None, &text).await;
    assert!(replies.is_empty());

    for rx in [&mut sender_rx, &mut peer_rx] {
        let event = recv_queued(rx).await;
        assert_eq!(event.event, EVENT_RECEIVE_MESSAGE);
        assert_eq!(event.str_field("user"), Some("ana"));
        assert_eq!(event.str_field("message"), Some("hi"));
    }
    assert!(state.conversations.read().await.is_empty(), "broadcasts are not stored");
}

#[tokio::test]
async fn broadcast_from_identified_connection_defaults_user_to_username() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let (conn, mut rx) = test_helpers::attach_connection(&state, Some(&ana), 8).await;

    let text = send_message_text(json!({ "message": "hey" }));
    process_inbound_text(&state, conn, Some(&ana), &text).await;

    let event = recv_queued(&mut rx).await;
    assert_eq!(event.str_field("user"), Some("ana"));
    assert_eq!(event.from.as_deref(), Some(ana.as_str()));
}

#[tokio::test]
async fn send_message_requires_message_text() {
    let state = test_helpers::test_app_state();
    let text = send_message_text(json!({ "user": "ana", "message": "   " }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), None, &text).await;
    assert_eq!(replies[0].event, EVENT_ERROR);
    assert_eq!(replies[0].str_field("code"), Some("E_VALIDATION"));
}

#[tokio::test]
async fn anonymous_broadcast_requires_user() {
    let state = test_helpers::test_app_state();
    let text = send_message_text(json!({ "message": "hi" }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), None, &text).await;
    assert_eq!(replies[0].str_field("code"), Some("E_VALIDATION"));
}

#[tokio::test]
async fn directed_send_routes_to_recipient_and_acks_sender() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let bob = test_helpers::seed_user(&state, "bob").await;
    let (ana_conn, mut ana_rx) = test_helpers::attach_connection(&state, Some(&ana), 8).await;
    let (_, mut bob_rx) = test_helpers::attach_connection(&state, Some(&bob), 8).await;
    let (_, mut anon_rx) = test_helpers::attach_connection(&state, None, 8).await;

    let text = send_message_text(json!({ "message": "just you", "to": bob }));
    let replies = process_inbound_text(&state, ana_conn, Some(&ana), &text).await;

    assert_eq!(replies.len(), 1);
    let ack = &replies[0];
    assert_eq!(ack.event, EVENT_MESSAGE_SENT);
    assert_eq!(ack.data.get("delivered").and_then(serde_json::Value::as_bool), Some(true));
    assert_eq!(ack.data.get("id").and_then(serde_json::Value::as_u64), Some(1));
    assert_eq!(ack.str_field("user"), Some("ana"));

    let received = recv_queued(&mut bob_rx).await;
    assert_eq!(received.event, EVENT_RECEIVE_MESSAGE);
    assert_eq!(received.str_field("message"), Some("just you"));
    assert_eq!(received.str_field("user"), Some("ana"));

    assert_nothing_queued(&mut ana_rx).await;
    assert_nothing_queued(&mut anon_rx).await;
    assert_eq!(state.conversations.read().await.len(), 1);
}

#[tokio::test]
async fn directed_send_stores_text_as_sent() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let bob = test_helpers::seed_user(&state, "bob").await;

    let text = send_message_text(json!({ "message": "  spaced out  ", "to": bob }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), Some(&ana), &text).await;
    assert_eq!(replies[0].event, EVENT_MESSAGE_SENT);
    assert_eq!(
        replies[0].data.get("text").and_then(serde_json::Value::as_str),
        Some("  spaced out  ")
    );

    let stored = state.conversations.write().await.fetch_between(&bob, &ana);
    assert_eq!(stored[0].text, "  spaced out  ");
}

#[tokio::test]
async fn directed_send_to_offline_recipient_is_pending() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let bob = test_helpers::seed_user(&state, "bob").await;

    let text = send_message_text(json!({ "message": "later", "to": bob }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), Some(&ana), &text).await;
    assert_eq!(replies[0].event, EVENT_MESSAGE_SENT);
    assert_eq!(replies[0].data.get("delivered").and_then(serde_json::Value::as_bool), Some(false));
}

#[tokio::test]
async fn directed_send_from_anonymous_connection_is_rejected() {
    let state = test_helpers::test_app_state();
    let bob = test_helpers::seed_user(&state, "bob").await;
    let text = send_message_text(json!({ "message": "hi", "to": bob }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), None, &text).await;
    assert_eq!(replies[0].event, EVENT_ERROR);
    assert_eq!(replies[0].str_field("code"), Some("E_VALIDATION"));
    assert!(state.conversations.read().await.is_empty());
}

#[tokio::test]
async fn directed_send_to_unknown_user_is_not_found() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let text = send_message_text(json!({ "message": "hi", "to": "ghost" }));
    let replies = process_inbound_text(&state, Uuid::new_v4(), Some(&ana), &text).await;
    assert_eq!(replies[0].str_field("code"), Some("E_NOT_FOUND"));
}

#[tokio::test]
async fn client_supplied_from_is_overwritten() {
    let state = test_helpers::test_app_state();
    let (conn, mut rx) = test_helpers::attach_connection(&state, None, 8).await;
    let text = json!({
        "event": "send_message",
        "from": "someone-else",
        "data": { "user": "ana", "message": "hi" }
    })
    .to_string();
    process_inbound_text(&state, conn, None, &text).await;
    assert!(recv_queued(&mut rx).await.from.is_none());
}

// =============================================================================
// END TO END
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.expect("server failed");
    });
    format!("ws://{addr}/ws")
}

async fn connect(url: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    client
}

/// Read events until one named `name` arrives.
async fn next_event(client: &mut Client, name: &str) -> Event {
    timeout(Duration::from_secs(2), async {
        loop {
            let msg = client
                .next()
                .await
                .expect("socket closed")
                .expect("socket error");
            let TungMessage::Text(text) = msg else { continue };
            let event: Event = serde_json::from_str(text.as_str()).expect("server sends valid events");
            if event.event == name {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(TungMessage::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

#[tokio::test]
async fn e2e_broadcast_between_two_anonymous_clients() {
    let state = test_helpers::test_app_state();
    let url = spawn_server(state).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    next_event(&mut a, EVENT_CONNECTED).await;
    next_event(&mut b, EVENT_CONNECTED).await;

    send_json(&mut a, json!({ "event": "send_message", "data": { "user": "ana", "message": "hello" } })).await;

    for client in [&mut a, &mut b] {
        let event = next_event(client, EVENT_RECEIVE_MESSAGE).await;
        assert_eq!(event.str_field("user"), Some("ana"));
        assert_eq!(event.str_field("message"), Some("hello"));
    }
}

#[tokio::test]
async fn e2e_directed_delivery_and_presence() {
    let state = test_helpers::test_app_state();
    let ana = test_helpers::seed_user(&state, "ana").await;
    let bob = test_helpers::seed_user(&state, "bob").await;
    let url = spawn_server(state.clone()).await;

    let mut bob_ws = connect(&format!("{url}?user_id={bob}")).await;
    let welcome = next_event(&mut bob_ws, EVENT_CONNECTED).await;
    assert_eq!(welcome.str_field("user_id"), Some(bob.as_str()));
    assert_eq!(welcome.data.get("active_users").and_then(serde_json::Value::as_u64), Some(1));

    let mut ana_ws = connect(&format!("{url}?user_id={ana}")).await;
    next_event(&mut ana_ws, EVENT_CONNECTED).await;

    let presence_event = next_event(&mut bob_ws, EVENT_PRESENCE).await;
    assert_eq!(presence_event.str_field("user_id"), Some(ana.as_str()));
    assert_eq!(presence_event.data.get("online").and_then(serde_json::Value::as_bool), Some(true));

    send_json(&mut ana_ws, json!({ "event": "send_message", "data": { "message": "psst", "to": bob } })).await;

    let ack = next_event(&mut ana_ws, EVENT_MESSAGE_SENT).await;
    assert_eq!(ack.data.get("delivered").and_then(serde_json::Value::as_bool), Some(true));

    let received = next_event(&mut bob_ws, EVENT_RECEIVE_MESSAGE).await;
    assert_eq!(received.str_field("message"), Some("psst"));
    assert_eq!(received.from.as_deref(), Some(ana.as_str()));

    ana_ws.close(None).await.expect("close");
    let offline = next_event(&mut bob_ws, EVENT_PRESENCE).await;
    assert_eq!(offline.str_field("user_id"), Some(ana.as_str()));
    assert_eq!(offline.data.get("online").and_then(serde_json::Value::as_bool), Some(false));
    assert_eq!(state.users.read().await.active_count(), 1);
}

#[tokio::test]
async fn e2e_unknown_user_id_is_rejected_before_upgrade() {
    let state = test_helpers::test_app_state();
    let url = spawn_server(state.clone()).await;

    let result = tokio_tungstenite::connect_async(format!("{url}?user_id=ghost")).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        Err(other) => panic!("expected http 404 rejection, got {other:?}"),
        Ok(_) => panic!("unknown user_id should not upgrade"),
    }
    assert!(state.connections.read().await.is_empty());
}

#[tokio::test]
async fn e2e_invalid_json_keeps_connection_open() {
    let state = test_helpers::test_app_state();
    let url = spawn_server(state).await;

    let mut client = connect(&url).await;
    next_event(&mut client, EVENT_CONNECTED).await;

    client
        .send(TungMessage::Text("nope".into()))
        .await
        .expect("ws send");
    let err = next_event(&mut client, EVENT_ERROR).await;
    assert_eq!(err.str_field("code"), Some("E_INVALID_EVENT"));

    send_json(&mut client, json!({ "event": "send_message", "data": { "user": "ana", "message": "still here" } })).await;
    let event = next_event(&mut client, EVENT_RECEIVE_MESSAGE).await;
    assert_eq!(event.str_field("message"), Some("still here"));
}
