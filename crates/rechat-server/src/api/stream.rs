use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Sse, sse::Event},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use rechat_core::ChunkEvent;

use super::state::AppState;

/// Reconnecting clients set this header so the server can tell a resume
/// from a first attach and reject resumes of streams it never saw.
pub const RECONNECT_HEADER: &str = "x-reconnect";

/// How long a fresh attach waits for its racing trigger to arrive
/// before the stream id is treated as unknown.
const ATTACH_GRACE: Duration = Duration::from_secs(1);
const ATTACH_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub id: Option<String>,
}

// GET /stream?id={message_id}
//
// Replays the retained prefix of the channel, then follows it live until
// the terminal event. A fresh attach may race ahead of its trigger, so
// an unknown id gets a short grace window for the trigger to land before
// the request is rejected; a reconnect never waits, because the stream
// it resumes must already have existed here.
pub async fn stream_chunks(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Missing required query parameter 'id'".to_string(),
        ));
    };

    let reconnect = headers
        .get(RECONNECT_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));

    if !stream_known(&state, &id)? {
        if reconnect {
            return Err((StatusCode::NOT_FOUND, format!("Stream '{id}' not found")));
        }

        // Fresh attach: tolerate the trigger still being in flight.
        let mut deadline = ATTACH_GRACE.as_millis() / ATTACH_POLL.as_millis();
        loop {
            if deadline == 0 {
                return Err((StatusCode::NOT_FOUND, format!("Stream '{id}' not found")));
            }
            tokio::time::sleep(ATTACH_POLL).await;
            if stream_known(&state, &id)? {
                break;
            }
            deadline -= 1;
        }
    }
    if reconnect {
        debug!(stream_id = %id, "Reconnect attach");
    }

    let stream = state.channels.subscribe(&id).map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Stream read failed, surfacing as error event");
                ChunkEvent::error(e.to_string())
            }
        };
        Ok::<_, Infallible>(Event::default().json_data(&event).unwrap())
    });

    Ok(Sse::new(stream))
}

// A stream id is known once its channel retains events or its
// generation task has been enqueued (the channel itself is lazy).
fn stream_known(state: &AppState, id: &str) -> Result<bool, (StatusCode, String)> {
    let known = state
        .channels
        .exists(id)
        .and_then(|exists| Ok(exists || state.scheduler.get_task(id)?.is_some()))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(known)
}
