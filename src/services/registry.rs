//! Connection registry: live websocket connections and their identities.
//!
//! DESIGN
//! ======
//! Each connection owns a bounded `mpsc` queue drained by its socket task.
//! The registry maps connection id → (optional user id, sender). A user may
//! hold several connections; presence follows the first connect and the
//! last disconnect.
//!
//! Connect and disconnect take the `users` lock before the `connections`
//! lock and hold both while updating, so a racing connect/disconnect pair
//! for the same user cannot leave them offline with a live connection.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::Event;
use crate::services::presence::PresenceChange;
use crate::services::users::UserError;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone)]
pub struct Connection {
    /// `None` for anonymous connections (broadcast-only).
    pub user_id: Option<String>,
    pub tx: mpsc::Sender<Event>,
}

/// Result of registering a websocket connection.
#[derive(Debug, Clone)]
pub struct Connected {
    pub connection_id: Uuid,
    /// Set for identified connections.
    pub presence: Option<PresenceChange>,
    pub active_users: usize,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns the number of live connections the user
    /// now holds (0 for anonymous connections).
    pub fn register(&mut self, connection_id: Uuid, user_id: Option<String>, tx: mpsc::Sender<Event>) -> usize {
        let count_user = user_id.clone();
        self.connections.insert(connection_id, Connection { user_id, tx });
        count_user.map_or(0, |uid| self.connection_count(&uid))
    }

    /// Remove a connection. Returns its user id and how many connections
    /// that user still holds, or `None` if the id was not registered.
    pub fn unregister(&mut self, connection_id: Uuid) -> Option<(Option<String>, usize)> {
        let connection = self.connections.remove(&connection_id)?;
        let remaining = connection
            .user_id
            .as_deref()
            .map_or(0, |uid| self.connection_count(uid));
        Some((connection.user_id, remaining))
    }

    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .values()
            .filter(|c| c.user_id.as_deref() == Some(user_id))
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enqueue an event on every connection of `user_id`. Returns how many
    /// accepted it.
    pub fn send_to_user(&self, user_id: &str, event: &Event) -> usize {
        self.connections
            .iter()
            .filter(|(_, c)| c.user_id.as_deref() == Some(user_id))
            .filter(|(id, c)| offer(**id, &c.tx, event))
            .count()
    }

    /// Enqueue an event on every connection except `exclude`. Returns how
    /// many accepted it.
    pub fn send_to_all(&self, event: &Event, exclude: Option<Uuid>) -> usize {
        self.connections
            .iter()
            .filter(|(id, _)| exclude != Some(**id))
            .filter(|(id, c)| offer(**id, &c.tx, event))
            .count()
    }
}

/// Best-effort enqueue. A full or closed queue drops the event for that
/// connection only.
fn offer(connection_id: Uuid, tx: &mpsc::Sender<Event>, event: &Event) -> bool {
    match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%connection_id, event = %event.event, "ws: outbound queue full, event dropped");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Register a connection and, for identified ones, mark the user online.
///
/// # Errors
///
/// Returns `NotFound` if `user_id` does not name a registered user.
pub async fn connect(
    state: &AppState,
    user_id: Option<String>,
    tx: mpsc::Sender<Event>,
) -> Result<Connected, UserError> {
    let connection_id = Uuid::new_v4();
    let mut users = state.users.write().await;
    if let Some(uid) = &user_id {
        if !users.contains(uid) {
            return Err(UserError::NotFound(uid.clone()));
        }
    }

    let mut connections = state.connections.write().await;
    let user_connections = connections.register(connection_id, user_id.clone(), tx);
    let total = connections.len();
    drop(connections);

    let presence = match &user_id {
        Some(uid) => Some(users.set_online(uid, true)?),
        None => None,
    };
    let active_users = users.active_count();
    info!(%connection_id, user_id = user_id.as_deref().unwrap_or("-"), user_connections, total, "ws: connection registered");

    Ok(Connected { connection_id, presence, active_users })
}

/// Remove a connection. When it was the user's last one, mark them offline
/// and return the change.
pub async fn disconnect(state: &AppState, connection_id: Uuid) -> Option<PresenceChange> {
    let mut users = state.users.write().await;
    let mut connections = state.connections.write().await;
    let (user_id, remaining) = connections.unregister(connection_id)?;
    let total = connections.len();
    drop(connections);
    info!(%connection_id, user_id = user_id.as_deref().unwrap_or("-"), remaining, total, "ws: connection removed");

    let uid = user_id?;
    if remaining > 0 {
        return None;
    }
    match users.set_online(&uid, false) {
        Ok(change) => Some(change),
        Err(e) => {
            warn!(error = %e, %connection_id, "ws: presence update on disconnect failed");
            None
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
