//! HTTP surface for the resumable chat core.

pub mod api;
pub mod config;

use axum::{
    Json, Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use api::{AppState, conversations, generate, stream};

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "rechat is working!".to_string(),
    })
}

/// Assemble the full application router. Shared with the integration
/// tests, which serve it on an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(api::stream::RECONNECT_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate::trigger_generation))
        .route("/stream", get(stream::stream_chunks))
        .route(
            "/conversations/{id}/messages",
            get(conversations::list_messages),
        )
        .layer(cors)
        .with_state(state)
}
