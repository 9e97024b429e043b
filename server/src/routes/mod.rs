pub mod chat;
pub mod permissions;
pub mod status;

use crate::AppContext;
use axum::response::sse::Event;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/permission-request", post(permissions::request_permission))
        .route("/api/permission-pending", get(permissions::list_pending))
        .route("/api/permission-respond", post(permissions::respond_permission))
        .route("/api/permission-events", get(permissions::permission_events))
        .route("/api/chat", post(chat::send_message))
        .route("/api/chat/abort", post(chat::abort_message))
        .route("/api/chat/running", get(chat::list_running))
        .route("/api/config", get(status::get_config))
        .route("/api/health", get(status::health))
        .with_state(ctx)
}

/// Serialize a payload into an SSE data frame.
pub(crate) fn sse_json<T: Serialize>(payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().data(data),
        Err(e) => Event::default()
            .event("error")
            .data(format!("{{\"type\":\"serialize.error\",\"error\":\"{}\"}}", e)),
    }
}
