//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the polling JSON endpoints and the websocket relay under a single
//! Axum router. CORS is open to any origin so a browser client served from
//! elsewhere can talk to both surfaces.

pub mod messages;
pub mod users;
pub mod ws;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::event::ErrorCode;
use crate::services::conversation::MessageError;
use crate::services::users::UserError;
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/logout", post(users::logout))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/send", post(messages::send))
        .route("/messages", get(messages::get_messages))
        .route("/check_messages", get(messages::check_messages))
        .route("/ws", get(ws::handle_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "Chat Server Running"
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error body: `{"error": "...", "code": "E_..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn from_code(err: &impl ErrorCode) -> Self {
        let code = err.error_code();
        Self { status: status_for_code(code), code, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message, "code": self.code }))).into_response()
    }
}

/// Malformed or mistyped request bodies are validation errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "E_VALIDATION", message: rejection.body_text() }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        Self::from_code(&err)
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        Self::from_code(&err)
    }
}

pub(crate) fn status_for_code(code: &str) -> StatusCode {
    match code {
        "E_VALIDATION" => StatusCode::BAD_REQUEST,
        "E_NOT_FOUND" => StatusCode::NOT_FOUND,
        "E_CONFLICT" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
