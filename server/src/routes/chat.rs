use super::sse_json;
use crate::claude::{run_cli, ChatRequest, RunningProcess};
use crate::error::Result;
use crate::AppContext;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

const CHAT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortArgs {
    pub request_id: String,
}

/// Spawn one CLI process for the message and stream its events back.
pub async fn send_message(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let invocation = ctx.cli.invocation(&request)?;
    let request_id = request
        .request_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(
        request_id = %request_id,
        session = ?invocation.resume_session,
        message = %request.message.chars().take(100).collect::<String>(),
        "chat message received"
    );

    let handle = ctx.processes.register(RunningProcess {
        request_id,
        session_id: invocation.resume_session.clone(),
        working_directory: invocation.working_directory.to_string_lossy().to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
    })?;

    let (tx, rx) = mpsc::channel(CHAT_EVENT_BUFFER);
    tokio::spawn(run_cli(invocation, handle, tx));

    let stream = ReceiverStream::new(rx).map(|event| Ok(sse_json(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn abort_message(
    State(ctx): State<Arc<AppContext>>,
    Json(args): Json<AbortArgs>,
) -> Result<Json<serde_json::Value>> {
    ctx.processes.abort(&args.request_id)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_running(State(ctx): State<Arc<AppContext>>) -> Json<Vec<RunningProcess>> {
    Json(ctx.processes.list())
}
