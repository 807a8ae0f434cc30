use axum::{
    Json,
    extract::{Path, State},
};

use rechat_core::Message;

use super::response::ApiResponse;
use super::state::AppState;

// GET /conversations/{id}/messages
//
// Full message log in submission order; unknown conversations read back
// as an empty list rather than an error.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Vec<Message>>> {
    match state.history.read(&id) {
        Ok(messages) => Json(ApiResponse::ok(messages)),
        Err(e) => Json(ApiResponse::error(format!(
            "Failed to read conversation: {}",
            e
        ))),
    }
}
