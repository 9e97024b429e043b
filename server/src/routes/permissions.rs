use super::sse_json;
use crate::error::Result;
use crate::permissions::{
    PendingPermission, PermissionDecision, PermissionRequestBody, PermissionResponse,
};
use crate::AppContext;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Called by the hook helper. Blocks until the operator decides or the broker times out.
pub async fn request_permission(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<PermissionRequestBody>,
) -> Result<Json<PermissionDecision>> {
    debug!(tool = %body.tool_name, tool_use_id = ?body.tool_use_id, "permission request received");

    let mode = body.permission_mode.unwrap_or_default();
    let request = PendingPermission::from_body(body);
    let decision = ctx.broker.request_decision(request, mode).await?;
    Ok(Json(decision))
}

pub async fn list_pending(State(ctx): State<Arc<AppContext>>) -> Json<Vec<PendingPermission>> {
    Json(ctx.broker.list_pending())
}

/// Operator decision from the UI. Unknown or expired ids answer 404 `{success:false}`.
pub async fn respond_permission(
    State(ctx): State<Arc<AppContext>>,
    Json(response): Json<PermissionResponse>,
) -> Result<Json<serde_json::Value>> {
    debug!(
        id = %response.id,
        allow = response.allow,
        allow_for_session = response.allow_for_session,
        "permission response received"
    );

    ctx.broker.submit_decision(&response)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Push alternative to polling `/api/permission-pending`.
pub async fn permission_events(
    State(ctx): State<Arc<AppContext>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(ctx.broker.subscribe())
        .filter_map(|event| event.ok().map(|event| Ok(sse_json(&event))));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
