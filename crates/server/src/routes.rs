//! REST surface for the conversation service.
//!
//! Endpoints:
//! - `POST /messages`  — submit one message to the caller's conversation
//! - `GET  /messages`  — read the caller's committed conversation history
//! - `GET  /user/me`   — echo the identity forwarded by the auth gateway
//!
//! Identity arrives in `X-Auth-Request-*` headers set by the edge proxy and
//! is converted into an explicit `AuthContext` here; nothing downstream
//! reads request-local state.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use confab_agent::ConversationRegistry;
use confab_core::domain::auth::headers as auth_headers;
use confab_core::{conversation_id, AuthContext, InterfaceError, Message};
use confab_mcp::ToolAdapter;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConversationRegistry>,
    pub adapter: Arc<ToolAdapter>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub text: String,
    pub actor: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: Option<String>,
    pub email: Option<String>,
    pub groups: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(get_messages).post(create_message))
        .route("/user/me", get(current_user))
        .with_state(state)
}

pub async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MessageRequest>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let auth = auth_from_headers(&headers);

    let Some(user_id) = auth.user.clone() else {
        return unauthorized(correlation_id);
    };

    if request.text.trim().is_empty() {
        return error_response(InterfaceError::BadRequest {
            message: "message text must not be empty".to_string(),
            correlation_id,
        });
    }

    info!(
        event_name = "api.message_received",
        conversation_id = %conversation_id(&user_id),
        correlation_id = %correlation_id,
        "message accepted for processing"
    );

    match state.registry.submit(&user_id, Message::new(request.text, auth)).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => {
            warn!(
                event_name = "api.message_failed",
                conversation_id = %conversation_id(&user_id),
                correlation_id = %correlation_id,
                error = %error,
                "message processing failed"
            );
            error_response(error.into_interface(correlation_id))
        }
    }
}

pub async fn get_messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let auth = auth_from_headers(&headers);

    let Some(user_id) = auth.user else {
        return unauthorized(correlation_id);
    };

    let output: Vec<MessageResponse> = state
        .registry
        .history(&user_id)
        .await
        .iter()
        .filter_map(|turn| {
            turn.visible_text()
                .map(|text| MessageResponse { text, actor: turn.role.as_str().to_string() })
        })
        .collect();

    (StatusCode::OK, Json(output)).into_response()
}

pub async fn current_user(headers: HeaderMap) -> Json<UserResponse> {
    let auth = auth_from_headers(&headers);
    Json(UserResponse {
        username: auth.user,
        email: auth.email,
        groups: auth.groups,
        name: auth.name,
    })
}

fn auth_from_headers(headers: &HeaderMap) -> AuthContext {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    AuthContext {
        user: read(auth_headers::USER),
        email: read(auth_headers::EMAIL),
        groups: read(auth_headers::GROUPS),
        name: read(auth_headers::NAME),
    }
}

fn unauthorized(correlation_id: String) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Missing authenticated user identity.".to_string(),
            correlation_id,
        }),
    )
        .into_response()
}

fn error_response(error: InterfaceError) -> Response {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: error.user_message().to_string(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body)).into_response()
}
