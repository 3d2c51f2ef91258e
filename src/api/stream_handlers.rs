//! Server-Sent Events handler for real-time company change notifications

use super::handlers::FeedState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::convert::Infallible;
use tracing::debug;

const EVENT_STREAM: &str = "text/event-stream; charset=utf-8";

/// `GET /api/stream`
///
/// Opens a streaming session and returns its frames as the response body:
/// `: connected\n\n` first, then one `data:` frame per change. The body never
/// ends on its own; when the client goes away axum drops it, and with it the
/// session handle, which unsubscribes from the bus.
pub async fn stream_changes(State(state): State<FeedState>) -> Response {
    let handle = state.sessions.open();
    debug!(session_id = %handle.id(), "SSE client connected");

    let body = Body::from_stream(handle.into_stream().map(Ok::<_, Infallible>));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        ],
        body,
    )
        .into_response()
}
