//! User service: registration, login/logout and lookup.
//!
//! DESIGN
//! ======
//! `UserDirectory` owns every `User` in registration order with id and
//! username indexes, plus the `ActiveSet`. Users are never removed, which
//! lets other services validate ids under this lock, release it, and still
//! rely on the ids staying valid.

use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use crate::event::now_ms;
use crate::services::presence::{self, ActiveSet, PresenceChange};
use crate::state::{AppState, User};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("username already taken: {0}")]
    UsernameTaken(String),
    #[error("user id already taken: {0}")]
    UserIdTaken(String),
    #[error("user not found: {0}")]
    NotFound(String),
}

impl crate::event::ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "E_VALIDATION",
            Self::UsernameTaken(_) | Self::UserIdTaken(_) => "E_CONFLICT",
            Self::NotFound(_) => "E_NOT_FOUND",
        }
    }
}

/// Successful login: the user plus the active count after marking online.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub presence: PresenceChange,
}

// =============================================================================
// DIRECTORY
// =============================================================================

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: Vec<User>,
    by_id: HashMap<String, usize>,
    by_username: HashMap<String, usize>,
    active: ActiveSet,
}

impl UserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, offline user.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` for a blank username, `UsernameTaken` or
    /// `UserIdTaken` on duplicates.
    pub fn register(&mut self, username: &str, user_id: Option<&str>) -> Result<User, UserError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(UserError::MissingField("username"));
        }
        if self.by_username.contains_key(username) {
            return Err(UserError::UsernameTaken(username.to_owned()));
        }

        let user_id = match user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if self.by_id.contains_key(id) => return Err(UserError::UserIdTaken(id.to_owned())),
            Some(id) => id.to_owned(),
            None => Uuid::new_v4().to_string(),
        };

        let user = User { user_id: user_id.clone(), username: username.to_owned(), created_at: now_ms(), is_online: false };
        let index = self.users.len();
        self.by_id.insert(user_id, index);
        self.by_username.insert(user.username.clone(), index);
        self.users.push(user.clone());
        Ok(user)
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&User> {
        self.by_id.get(user_id).map(|&i| &self.users[i])
    }

    #[must_use]
    pub fn find_by_username(&self, username: &str) -> Option<&User> {
        self.by_username.get(username).map(|&i| &self.users[i])
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.by_id.contains_key(user_id)
    }

    /// All users in registration order.
    #[must_use]
    pub fn list(&self) -> &[User] {
        &self.users
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Move a user in or out of the active set, keeping `is_online` in step.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn set_online(&mut self, user_id: &str, online: bool) -> Result<PresenceChange, UserError> {
        let index = *self
            .by_id
            .get(user_id)
            .ok_or_else(|| UserError::NotFound(user_id.to_owned()))?;

        let changed = if online { self.active.insert(user_id) } else { self.active.remove(user_id) };
        let user = &mut self.users[index];
        user.is_online = online;

        Ok(PresenceChange {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            online,
            changed,
            active_users: self.active.len(),
        })
    }
}

// =============================================================================
// SERVICE
// =============================================================================

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Register a user.
///
/// # Errors
///
/// Returns validation or conflict errors from [`UserDirectory::register`].
pub async fn register(state: &AppState, username: Option<&str>, user_id: Option<&str>) -> Result<User, UserError> {
    let username = non_blank(username).ok_or(UserError::MissingField("username"))?;
    let mut users = state.users.write().await;
    let user = users.register(username, user_id)?;
    info!(user_id = %user.user_id, username = %user.username, total = users.len(), "user registered");
    Ok(user)
}

/// Log a user in by id or, failing that, by username. An id wins when both
/// are given, even if it does not match.
///
/// # Errors
///
/// Returns `MissingField` when neither is given, `NotFound` when no user
/// matches.
pub async fn login(state: &AppState, user_id: Option<&str>, username: Option<&str>) -> Result<LoginOutcome, UserError> {
    let mut user = {
        let users = state.users.read().await;
        match (non_blank(user_id), non_blank(username)) {
            (Some(id), _) => users.get(id).cloned().ok_or_else(|| UserError::NotFound(id.to_owned()))?,
            (None, Some(name)) => users
                .find_by_username(name)
                .cloned()
                .ok_or_else(|| UserError::NotFound(name.to_owned()))?,
            (None, None) => return Err(UserError::MissingField("user_id or username")),
        }
    };

    // Users are never removed, so the id resolved above stays valid.
    let presence = presence::mark_online(state, &user.user_id).await?;
    user.is_online = presence.online;
    info!(user_id = %user.user_id, active = presence.active_users, "user logged in");
    Ok(LoginOutcome { user, presence })
}

/// Log a user out. Already-offline users succeed unchanged.
///
/// # Errors
///
/// Returns `MissingField` for a blank id, `NotFound` for an unknown one.
pub async fn logout(state: &AppState, user_id: Option<&str>) -> Result<PresenceChange, UserError> {
    let user_id = non_blank(user_id).ok_or(UserError::MissingField("user_id"))?;
    let change = presence::mark_offline(state, user_id).await?;
    info!(%user_id, active = change.active_users, changed = change.changed, "user logged out");
    Ok(change)
}

/// Fetch one user.
///
/// # Errors
///
/// Returns `NotFound` if the user does not exist.
pub async fn get_user(state: &AppState, user_id: &str) -> Result<User, UserError> {
    let users = state.users.read().await;
    users
        .get(user_id)
        .cloned()
        .ok_or_else(|| UserError::NotFound(user_id.to_owned()))
}

/// Snapshot of all users plus the active count.
pub async fn list_users(state: &AppState) -> (Vec<User>, usize) {
    let users = state.users.read().await;
    (users.list().to_vec(), users.active_count())
}

#[cfg(test)]
#[path = "users_test.rs"]
mod tests;
