use crate::config::WebchatConfig;
use crate::AppContext;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Effective config, with the resolved claude binary filled in.
pub async fn get_config(State(ctx): State<Arc<AppContext>>) -> Json<WebchatConfig> {
    let mut config = ctx.config.clone();
    config.claude_binary = Some(ctx.cli.claude_binary.clone());
    Json(config)
}
