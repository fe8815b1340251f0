//! User routes: register, login/logout, lookup.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::services::presence::PresenceChange;
use crate::services::{router, users};
use crate::state::{AppState, User};

#[derive(Debug, Default, Deserialize)]
pub struct RegisterBody {
    pub username: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginBody {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutBody {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub active_users: usize,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub user_id: String,
    pub active_users: usize,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub active_users: usize,
}

/// Tell live websocket clients about a presence change made over HTTP.
async fn announce(state: &AppState, change: &PresenceChange) {
    if change.changed {
        router::broadcast(state, &change.to_event(), None).await;
    }
}

/// `POST /register`: create a user.
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(body) = body?;
    let user = users::register(&state, body.username.as_deref(), body.user_id.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `POST /login`: mark a user online by id or username.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(body) = body?;
    let outcome = users::login(&state, body.user_id.as_deref(), body.username.as_deref()).await?;
    announce(&state, &outcome.presence).await;
    Ok(Json(LoginResponse { user: outcome.user, active_users: outcome.presence.active_users }))
}

/// `POST /logout`: mark a user offline.
pub async fn logout(
    State(state): State<AppState>,
    body: Result<Json<LogoutBody>, JsonRejection>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Json(body) = body?;
    let change = users::logout(&state, body.user_id.as_deref()).await?;
    announce(&state, &change).await;
    Ok(Json(LogoutResponse { user_id: change.user_id, active_users: change.active_users }))
}

/// `GET /users`: every user plus the active count.
pub async fn list_users(State(state): State<AppState>) -> Json<UsersResponse> {
    let (users, active_users) = users::list_users(&state).await;
    Json(UsersResponse { users, active_users })
}

/// `GET /users/{id}`: one user.
pub async fn get_user(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<User>, ApiError> {
    Ok(Json(users::get_user(&state, &user_id).await?))
}
