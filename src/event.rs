//! Event: the envelope for everything sent over the chat websocket.
//!
//! ARCHITECTURE
//! ============
//! Clients send `send_message` events; the server answers with
//! `receive_message`, `message_sent`, `presence`, `connected` and `error`
//! events. Every event shares one flat envelope so the socket loop can
//! route on `event` without inspecting `data`.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Inbound envelopes may omit `id`, `ts` and `from`; serde fills them.
//! - `from` is stamped by the server with the connection's identity and
//!   never trusted from the client.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_RECEIVE_MESSAGE: &str = "receive_message";
pub const EVENT_MESSAGE_SENT: &str = "message_sent";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_ERROR: &str = "error";

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Event data key for error messages.
pub const EVENT_MESSAGE: &str = "message";

/// Event data key for grepable error codes.
pub const EVENT_CODE: &str = "code";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The websocket envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Milliseconds since Unix epoch.
    #[serde(default = "now_ms")]
    pub ts: i64,
    pub event: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured error events and HTTP error bodies.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Event {
    pub fn new(event: impl Into<String>, data: Data) -> Self {
        Self { id: Uuid::new_v4(), ts: now_ms(), event: event.into(), from: None, data }
    }

    /// Create an error event from a plain string.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(EVENT_ERROR, Data::new())
            .with_data(EVENT_CODE, code)
            .with_data(EVENT_MESSAGE, message)
    }

    /// Create an error event from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::error(err.error_code(), err.to_string())
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Event {
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Read a string field from the payload, treating blank values as absent.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
