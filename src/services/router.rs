//! Message router: validate, store, then deliver to live connections.
//!
//! DESIGN
//! ======
//! Sending always appends to the conversation log first, so a message is
//! queryable by polling whether or not the recipient is connected. Live
//! delivery is best-effort: it enqueues a `receive_message` event on every
//! connection of the recipient and reports how many accepted it. Zero means
//! the message is pending until the recipient polls.

use tracing::info;
use uuid::Uuid;

use crate::event::{Data, EVENT_RECEIVE_MESSAGE, Event, now_ms};
use crate::services::conversation::MessageError;
use crate::state::{AppState, Message};

/// A stored message and how many live connections it reached.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub sender_username: String,
    pub delivered: usize,
}

impl SendOutcome {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.delivered == 0
    }
}

/// `receive_message` event for a stored message. Carries the legacy
/// `user`/`message` keys alongside the full record.
#[must_use]
pub fn message_event(message: &Message, sender_username: &str) -> Event {
    message_data(Event::new(EVENT_RECEIVE_MESSAGE, Data::new()), message)
        .with_from(message.sender_id.clone())
        .with_data("user", sender_username)
}

/// Copy a message record's fields into an event payload.
#[must_use]
pub fn message_data(event: Event, message: &Message) -> Event {
    event
        .with_data("id", message.id)
        .with_data("sender_id", message.sender_id.clone())
        .with_data("receiver_id", message.receiver_id.clone())
        .with_data("message", message.text.clone())
        .with_data("text", message.text.clone())
        .with_data("timestamp", message.timestamp)
        .with_data("read", message.read)
}

/// Validate and store a message, then deliver it to the receiver's live
/// connections.
///
/// # Errors
///
/// Returns `MissingField` for blank inputs and `UnknownUser` when either id
/// does not resolve.
pub async fn send_message(
    state: &AppState,
    sender_id: Option<&str>,
    receiver_id: Option<&str>,
    text: Option<&str>,
) -> Result<SendOutcome, MessageError> {
    let sender_id = non_blank(sender_id).ok_or(MessageError::MissingField("sender_id"))?;
    let receiver_id = non_blank(receiver_id).ok_or(MessageError::MissingField("receiver_id"))?;
    // Text is stored as sent; only an all-blank body is rejected.
    let text = text
        .filter(|t| !t.trim().is_empty())
        .ok_or(MessageError::MissingField("text"))?;

    let sender_username = {
        let users = state.users.read().await;
        let sender = users
            .get(sender_id)
            .ok_or_else(|| MessageError::UnknownUser(sender_id.to_owned()))?;
        if !users.contains(receiver_id) {
            return Err(MessageError::UnknownUser(receiver_id.to_owned()));
        }
        sender.username.clone()
    };

    let message = {
        let mut log = state.conversations.write().await;
        // Stamped under the lock so polling cursors never pass it.
        let timestamp = now_ms();
        log.append(sender_id, receiver_id, text, timestamp)
    };

    let delivered = deliver_to_user(state, receiver_id, &message_event(&message, &sender_username)).await;
    if delivered == 0 {
        info!(id = message.id, %sender_id, %receiver_id, "message stored, recipient offline (pending)");
    } else {
        info!(id = message.id, %sender_id, %receiver_id, delivered, "message delivered");
    }

    Ok(SendOutcome { message, sender_username, delivered })
}

/// Enqueue an event on every live connection of `user_id`.
pub async fn deliver_to_user(state: &AppState, user_id: &str, event: &Event) -> usize {
    state.connections.read().await.send_to_user(user_id, event)
}

/// Enqueue an event on every live connection, optionally excluding one.
pub async fn broadcast(state: &AppState, event: &Event, exclude: Option<Uuid>) -> usize {
    state.connections.read().await.send_to_all(event, exclude)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
