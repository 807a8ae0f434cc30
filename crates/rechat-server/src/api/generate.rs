use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use rechat_core::Message;

use super::response::ApiResponse;
use super::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub conversation_id: String,
    pub message: Message,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Stream channel to attach to; equals the triggering message id.
    pub stream_id: String,
    /// False when this trigger was a duplicate of an earlier one.
    pub enqueued: bool,
}

// POST /generate
//
// Fire-and-forget trigger: enqueues the generation task and returns
// immediately. The response carries no model output; callers attach to
// the stream endpoint for that. Duplicate triggers for the same message
// id come back with `enqueued: false` and no side effects.
pub async fn trigger_generation(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<GenerateResponse>>, (StatusCode, String)> {
    validate_id(&request.conversation_id, "conversationId")?;
    validate_id(&request.message.id, "message.id")?;
    if request.message.text().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message text is empty".to_string()));
    }

    let stream_id = request.message.id.clone();
    let enqueued = state
        .submit(&request.conversation_id, request.message)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    info!(
        conversation_id = %request.conversation_id,
        stream_id = %stream_id,
        enqueued,
        "Generation triggered"
    );

    Ok(Json(ApiResponse::ok(GenerateResponse {
        stream_id,
        enqueued,
    })))
}

// Ids end up inside storage keys, where `:` is the segment delimiter.
fn validate_id(id: &str, field: &str) -> Result<(), (StatusCode, String)> {
    if id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, format!("{field} is empty")));
    }
    if id.contains(':') {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{field} must not contain ':'"),
        ));
    }
    Ok(())
}
