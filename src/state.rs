//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Each collection is owned by exactly one structure behind its own
//! `RwLock`, so writers are serialized per collection:
//! - `users`: user directory plus the active (online) set
//! - `conversations`: append-only message log
//! - `connections`: live websocket connections and their outbound queues
//!
//! LOCK ORDER
//! ==========
//! `users` → `conversations` → `connections`. Never hold a lock while
//! awaiting socket I/O; delivery only enqueues into bounded channels.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::services::conversation::ConversationLog;
use crate::services::registry::ConnectionRegistry;
use crate::services::users::UserDirectory;

// =============================================================================
// RECORDS
// =============================================================================

/// A registered chat participant. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    pub is_online: bool,
}

/// One chat message. Only `read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    pub read: bool,
}

impl Message {
    /// True when this message belongs to the unordered pair `{a, b}`.
    #[must_use]
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub users: Arc<RwLock<UserDirectory>>,
    pub conversations: Arc<RwLock<ConversationLog>>,
    pub connections: Arc<RwLock<ConnectionRegistry>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            users: Arc::new(RwLock::new(UserDirectory::new())),
            conversations: Arc::new(RwLock::new(ConversationLog::new())),
            connections: Arc::new(RwLock::new(ConnectionRegistry::new())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
