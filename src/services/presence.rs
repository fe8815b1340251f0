//! Presence tracker: the set of users considered online.
//!
//! DESIGN
//! ======
//! Presence is set membership, so repeated logins or logouts are no-ops and
//! the active count can never go negative. The set lives inside
//! `UserDirectory` so a user's `is_online` flag and set membership are
//! always updated under the same lock.

use std::collections::HashSet;

use crate::event::{Data, EVENT_PRESENCE, Event};
use crate::services::users::UserError;
use crate::state::AppState;

// =============================================================================
// ACTIVE SET
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct ActiveSet {
    members: HashSet<String>,
}

impl ActiveSet {
    /// Add a user. Returns true when membership changed.
    pub fn insert(&mut self, user_id: &str) -> bool {
        self.members.insert(user_id.to_owned())
    }

    /// Remove a user. Returns true when membership changed.
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.members.remove(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// =============================================================================
// PRESENCE CHANGE
// =============================================================================

/// Result of an online/offline transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: String,
    pub username: String,
    pub online: bool,
    /// False when the user was already in the requested state.
    pub changed: bool,
    pub active_users: usize,
}

impl PresenceChange {
    /// Event announcing this transition to other connections.
    #[must_use]
    pub fn to_event(&self) -> Event {
        Event::new(EVENT_PRESENCE, Data::new())
            .with_data("user_id", self.user_id.clone())
            .with_data("username", self.username.clone())
            .with_data("online", self.online)
            .with_data("active_users", self.active_users)
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Mark a user online.
///
/// # Errors
///
/// Returns `NotFound` if the user does not exist.
pub async fn mark_online(state: &AppState, user_id: &str) -> Result<PresenceChange, UserError> {
    let mut users = state.users.write().await;
    users.set_online(user_id, true)
}

/// Mark a user offline. Succeeds even if the user is already offline.
///
/// # Errors
///
/// Returns `NotFound` if the user does not exist.
pub async fn mark_offline(state: &AppState, user_id: &str) -> Result<PresenceChange, UserError> {
    let mut users = state.users.write().await;
    users.set_online(user_id, false)
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
