//! WebSocket handler: bidirectional chat relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers the connection and enters a `select!` loop:
//! - Incoming client events → parse + dispatch by event name
//! - Queued events from other senders → forward to client
//!
//! Handler functions validate and mutate state, then return an `Outcome`.
//! The dispatch layer owns all outbound concerns: reply to the sender or
//! broadcast to every connection.
//!
//! `send_message` has two shapes:
//! - `{user, message}`: broadcast to every connection, sender included.
//!   Nothing is stored.
//! - `{message, to}` from an identified connection: stored and routed to the
//!   recipient's connections; the sender gets `message_sent`.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade (`?user_id=` optional) → register → send `connected`
//! 2. Identified connect → broadcast `presence` to other connections
//! 3. Client sends events → dispatch → Outcome applied
//! 4. Close → unregister → broadcast `presence` if the user went offline

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::ApiError;
use crate::event::{Data, EVENT_CONNECTED, EVENT_MESSAGE_SENT, EVENT_RECEIVE_MESSAGE, EVENT_SEND_MESSAGE, Event};
use crate::services::conversation::MessageError;
use crate::services::{registry, router, users};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send events directly.
enum Outcome {
    /// Send to the originating connection only.
    Reply(Event),
    /// Enqueue on every connection, sender included.
    Broadcast(Event),
}

// =============================================================================
// UPGRADE
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
}

pub async fn handle_ws(State(state): State<AppState>, Query(params): Query<WsParams>, ws: WebSocketUpgrade) -> Response {
    let user_id = params
        .user_id
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty());

    if let Some(uid) = &user_id {
        if let Err(e) = users::get_user(&state, uid).await {
            return ApiError::from(e).into_response();
        }
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Option<String>) {
    // Per-connection queue for events routed here by other senders.
    let (client_tx, mut client_rx) = mpsc::channel::<Event>(state.config.client_queue_capacity);

    let connected = match registry::connect(&state, user_id.clone(), client_tx).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "ws: connection rejected after upgrade");
            let _ = send_event(&mut socket, &Event::error_from(&e)).await;
            return;
        }
    };
    let connection_id = connected.connection_id;

    let mut welcome = Event::new(EVENT_CONNECTED, Data::new())
        .with_data("connection_id", connection_id.to_string())
        .with_data("active_users", connected.active_users);
    if let Some(uid) = &user_id {
        welcome = welcome.with_data("user_id", uid.clone());
    }

    if send_event(&mut socket, &welcome).await.is_ok() {
        info!(%connection_id, user_id = user_id.as_deref().unwrap_or("-"), "ws: client connected");

        if let Some(change) = connected.presence.as_ref().filter(|c| c.changed) {
            router::broadcast(&state, &change.to_event(), Some(connection_id)).await;
        }

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        WsMessage::Text(text) => {
                            let replies = process_inbound_text(&state, connection_id, user_id.as_deref(), &text).await;
                            for event in replies {
                                let _ = send_event(&mut socket, &event).await;
                            }
                        }
                        WsMessage::Close(_) => break,
                        _ => {}
                    }
                }
                Some(event) = client_rx.recv() => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(change) = registry::disconnect(&state, connection_id).await {
        router::broadcast(&state, &change.to_event(), None).await;
    }
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound text event and return events for the
/// sender. Broadcast outcomes are enqueued here, including on the sender's
/// own queue.
async fn process_inbound_text(state: &AppState, connection_id: Uuid, user_id: Option<&str>, text: &str) -> Vec<Event> {
    let mut req: Event = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound event");
            return vec![Event::error("E_INVALID_EVENT", format!("invalid json: {e}"))];
        }
    };

    // Identity comes from the connection, never from the payload.
    req.from = user_id.map(str::to_owned);
    info!(%connection_id, id = %req.id, event = %req.event, "ws: recv event");

    let result = match req.event.as_str() {
        EVENT_SEND_MESSAGE => handle_send_message(state, user_id, &req).await,
        other => Err(Event::error("E_UNKNOWN_EVENT", format!("unknown event: {other}"))),
    };

    match result {
        Ok(Outcome::Reply(event)) => vec![event],
        Ok(Outcome::Broadcast(event)) => {
            router::broadcast(state, &event, None).await;
            vec![]
        }
        Err(err_event) => vec![err_event],
    }
}

// =============================================================================
// SEND_MESSAGE HANDLER
// =============================================================================

async fn handle_send_message(state: &AppState, user_id: Option<&str>, req: &Event) -> Result<Outcome, Event> {
    // Blank check on the trimmed value; the text itself is relayed and
    // stored as sent, matching `POST /send`.
    if req.str_field("message").is_none() {
        return Err(Event::error_from(&MessageError::MissingField("message")));
    }
    let text = req
        .data
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    if let Some(to) = req.str_field("to") {
        let Some(sender_id) = user_id else {
            return Err(Event::error_from(&MessageError::Unidentified));
        };
        return match router::send_message(state, Some(sender_id), Some(to), Some(text)).await {
            Ok(outcome) => {
                let delivered = !outcome.is_pending();
                let ack = router::message_data(Event::new(EVENT_MESSAGE_SENT, Data::new()), &outcome.message)
                    .with_data("user", outcome.sender_username)
                    .with_data("delivered", delivered);
                Ok(Outcome::Reply(ack))
            }
            Err(e) => Err(Event::error_from(&e)),
        };
    }

    let user = match (req.str_field("user"), user_id) {
        (Some(user), _) => user.to_owned(),
        (None, Some(uid)) => match users::get_user(state, uid).await {
            Ok(u) => u.username,
            Err(e) => return Err(Event::error_from(&e)),
        },
        (None, None) => return Err(Event::error_from(&MessageError::MissingField("user"))),
    };
    info!(%user, "ws: broadcasting message");

    let mut event = Event::new(EVENT_RECEIVE_MESSAGE, Data::new())
        .with_data("user", user)
        .with_data("message", text);
    event.from.clone_from(&req.from);
    Ok(Outcome::Broadcast(event))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    if event.event == crate::event::EVENT_ERROR {
        let code = event.str_field("code").unwrap_or("-");
        let message = event.str_field("message").unwrap_or("-");
        warn!(id = %event.id, code, message, "ws: send error event");
    } else {
        info!(id = %event.id, event = %event.event, "ws: send event");
    }
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
