//! Conversation store: append-only message log with read tracking.
//!
//! DESIGN
//! ======
//! Messages live in one `Vec` in append order; ids are monotonic from 1.
//! Queries are full scans: message volume is small and unpaginated. The only
//! mutation after append is flipping `read` from false to true when the
//! receiver fetches a conversation.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::event::now_ms;
use crate::state::{AppState, Message};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("user not found: {0}")]
    UnknownUser(String),
    #[error("connection is not identified; reconnect with ?user_id= to send directed messages")]
    Unidentified,
}

impl crate::event::ErrorCode for MessageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) | Self::InvalidField { .. } | Self::Unidentified => "E_VALIDATION",
            Self::UnknownUser(_) => "E_NOT_FOUND",
        }
    }
}

/// Per-counterpart summary line for the unread check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub username: String,
    pub last_message: String,
    pub last_timestamp: i64,
    pub unread_count: usize,
}

/// Response body of the unread check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckMessages {
    pub user_id: String,
    pub new_messages: Vec<Message>,
    pub unread_count: usize,
    pub conversations: Vec<ConversationSummary>,
    /// Pass back as `last_check` on the next poll. Taken before the scan.
    pub server_time: i64,
}

/// Raw scan result before counterpart ids are resolved to usernames.
#[derive(Debug, Clone, Default)]
pub struct UnreadScan {
    pub new_messages: Vec<Message>,
    pub unread_count: usize,
    /// Keyed by counterpart id: (last text, last timestamp, unread from them).
    pub counterparts: BTreeMap<String, (String, i64, usize)>,
}

// =============================================================================
// LOG
// =============================================================================

#[derive(Debug)]
pub struct ConversationLog {
    messages: Vec<Message>,
    next_id: u64,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLog {
    #[must_use]
    pub fn new() -> Self {
        Self { messages: Vec::new(), next_id: 1 }
    }

    /// Append an unread message and return a copy of it. Callers validate
    /// both ids against the user directory first.
    pub fn append(&mut self, sender_id: &str, receiver_id: &str, text: &str, timestamp: i64) -> Message {
        let message = Message {
            id: self.next_id,
            sender_id: sender_id.to_owned(),
            receiver_id: receiver_id.to_owned(),
            text: text.to_owned(),
            timestamp,
            read: false,
        };
        self.next_id += 1;
        self.messages.push(message.clone());
        message
    }

    /// All messages between `reader` and `other` in append order. Messages
    /// addressed to `reader` are marked read first, so the returned copies
    /// show the post-fetch state.
    pub fn fetch_between(&mut self, reader: &str, other: &str) -> Vec<Message> {
        let mut out = Vec::new();
        let mut marked = 0usize;
        for message in self.messages.iter_mut().filter(|m| m.is_between(reader, other)) {
            if message.receiver_id == reader && !message.read {
                message.read = true;
                marked += 1;
            }
            out.push(message.clone());
        }
        debug!(%reader, %other, returned = out.len(), marked, "conversation fetched");
        out
    }

    /// Scan for unread messages addressed to `user_id` and summarize every
    /// counterpart. `last_check` only narrows `new_messages` and is
    /// inclusive: a message stamped exactly at the previous `server_time`
    /// may be returned twice but is never skipped.
    #[must_use]
    pub fn scan_unread(&self, user_id: &str, last_check: Option<i64>) -> UnreadScan {
        let mut scan = UnreadScan::default();
        for message in &self.messages {
            let counterpart = if message.receiver_id == user_id {
                &message.sender_id
            } else if message.sender_id == user_id {
                &message.receiver_id
            } else {
                continue;
            };

            let entry = scan
                .counterparts
                .entry(counterpart.clone())
                .or_insert_with(|| (String::new(), 0, 0));
            entry.0.clone_from(&message.text);
            entry.1 = message.timestamp;

            if message.receiver_id == user_id && !message.read {
                entry.2 += 1;
                scan.unread_count += 1;
                if last_check.is_none_or(|since| message.timestamp >= since) {
                    scan.new_messages.push(message.clone());
                }
            }
        }
        scan
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// =============================================================================
// SERVICE
// =============================================================================

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, MessageError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(MessageError::MissingField(field))
}

/// Fetch the conversation between `user1` and `user2`, marking messages
/// addressed to `user1` as read.
///
/// # Errors
///
/// Returns `MissingField` for blank ids and `UnknownUser` for ids that do
/// not resolve.
pub async fn fetch_conversation(
    state: &AppState,
    user1: Option<&str>,
    user2: Option<&str>,
) -> Result<Vec<Message>, MessageError> {
    let user1 = required(user1, "user1")?;
    let user2 = required(user2, "user2")?;
    {
        let users = state.users.read().await;
        for id in [user1, user2] {
            if !users.contains(id) {
                return Err(MessageError::UnknownUser(id.to_owned()));
            }
        }
    }

    let mut log = state.conversations.write().await;
    Ok(log.fetch_between(user1, user2))
}

/// Unread messages for a user plus a per-counterpart summary. Read-only.
///
/// # Errors
///
/// Returns `MissingField`, `InvalidField` for a non-integer `last_check`, or
/// `UnknownUser`.
pub async fn check_messages(
    state: &AppState,
    user_id: Option<&str>,
    last_check: Option<&str>,
) -> Result<CheckMessages, MessageError> {
    let user_id = required(user_id, "user_id")?;
    let last_check = match last_check.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| MessageError::InvalidField { field: "last_check", value: raw.to_owned() })?,
        ),
        None => None,
    };

    let users = state.users.read().await;
    if !users.contains(user_id) {
        return Err(MessageError::UnknownUser(user_id.to_owned()));
    }
    // `server_time` is read under the log lock, so every later append is
    // stamped at or after it.
    let (scan, server_time) = {
        let log = state.conversations.read().await;
        let server_time = now_ms();
        (log.scan_unread(user_id, last_check), server_time)
    };

    let mut conversations: Vec<ConversationSummary> = scan
        .counterparts
        .into_iter()
        .map(|(counterpart, (last_message, last_timestamp, unread_count))| ConversationSummary {
            username: users
                .get(&counterpart)
                .map(|u| u.username.clone())
                .unwrap_or_default(),
            user_id: counterpart,
            last_message,
            last_timestamp,
            unread_count,
        })
        .collect();
    drop(users);
    conversations.sort_by(|a, b| {
        b.last_timestamp
            .cmp(&a.last_timestamp)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    Ok(CheckMessages {
        user_id: user_id.to_owned(),
        new_messages: scan.new_messages,
        unread_count: scan.unread_count,
        conversations,
        server_time,
    })
}

#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;
