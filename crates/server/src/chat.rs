use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use maitre_agent::{AgentRuntime, TurnReply};
use maitre_core::domain::conversation::SessionId;
use maitre_core::errors::InterfaceError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/api/v1/sessions/{session_id}/messages", post(post_message))
        .route("/api/v1/sessions/{session_id}", axum::routing::delete(end_session))
        .with_state(ChatState { runtime })
}

pub async fn post_message(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TurnReply>, (StatusCode, Json<ErrorBody>)> {
    let session_id = session(session_id)?;
    if request.text.trim().is_empty() {
        return Err(bad_request("message text is empty"));
    }

    Ok(Json(state.runtime.process_turn(&session_id, request.text.trim()).await))
}

pub async fn end_session(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = match session(session_id) {
        Ok(session_id) => session_id,
        Err(rejection) => return rejection.into_response(),
    };

    let existed = state.runtime.end_session(&session_id).await;
    info!(
        event_name = "http.session.ended",
        session_id = %session_id.0,
        existed,
        "session end requested"
    );
    if existed {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn session(raw: String) -> Result<SessionId, (StatusCode, Json<ErrorBody>)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return Err(bad_request("session id must be 1..=128 characters"));
    }
    Ok(SessionId(trimmed.to_string()))
}

fn bad_request(reason: &str) -> (StatusCode, Json<ErrorBody>) {
    let correlation_id = Uuid::new_v4().to_string();
    let error = InterfaceError::BadRequest {
        message: reason.to_string(),
        correlation_id: correlation_id.clone(),
    };
    warn!(
        event_name = "http.request.rejected",
        correlation_id = %correlation_id,
        error = %error,
        "request rejected"
    );
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: error.user_message().to_string(), correlation_id }),
    )
}
