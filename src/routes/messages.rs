//! Message routes: send, fetch a conversation, poll for unread.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::services::conversation::{self, CheckMessages};
use crate::services::router;
use crate::state::{AppState, Message};

#[derive(Debug, Default, Deserialize)]
pub struct SendBody {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    #[serde(flatten)]
    pub message: Message,
    /// True when at least one live connection of the receiver got it.
    pub delivered: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationQuery {
    pub user1: Option<String>,
    pub user2: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<Message>,
}

/// Kept as raw strings so blank or malformed values become JSON validation
/// errors instead of extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub user_id: Option<String>,
    pub last_check: Option<String>,
}

/// `POST /send`: store a message and deliver it live when possible.
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let Json(body) = body?;
    let outcome = router::send_message(
        &state,
        body.sender_id.as_deref(),
        body.receiver_id.as_deref(),
        body.text.as_deref(),
    )
    .await?;
    let delivered = !outcome.is_pending();
    Ok((StatusCode::CREATED, Json(SendResponse { message: outcome.message, delivered })))
}

/// `GET /messages?user1=&user2=`: conversation in append order. Marks
/// messages addressed to `user1` as read.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let messages = conversation::fetch_conversation(&state, query.user1.as_deref(), query.user2.as_deref()).await?;
    Ok(Json(ConversationResponse { messages }))
}

/// `GET /check_messages?user_id=&last_check=`: unread summary.
pub async fn check_messages(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckMessages>, ApiError> {
    let check = conversation::check_messages(&state, query.user_id.as_deref(), query.last_check.as_deref()).await?;
    Ok(Json(check))
}
