//! webchat permission hook
//!
//! Registered as a Claude Code `PreToolUse` command hook. Claude writes the
//! pending tool call to our stdin; we POST it to the webchat server and wait
//! for the operator's decision, then print it in the hook output schema.
//!
//! If the server can't be reached the tool call is denied. This hook never
//! fails open.
//!
//! Environment variables:
//! - WEBCHAT_SERVER_URL: base URL of the webchat server (default http://127.0.0.1:3131)
//! - WEBCHAT_HOOK_TIMEOUT: seconds to wait for a decision, set by the server to its
//!   permission timeout plus 5 (default 305)

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3131";

/// Server waits 300s; give its timeout deny time to arrive.
const DEFAULT_TIMEOUT_SECS: u64 = 305;

/// What Claude sends a PreToolUse hook on stdin
#[derive(Debug, Deserialize)]
struct HookInput {
    #[serde(default)]
    session_id: Option<String>,
    tool_name: String,
    #[serde(default)]
    tool_input: serde_json::Value,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    permission_mode: Option<String>,
}

/// Request body sent to the webchat server
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PermissionCallbackRequest {
    tool_name: String,
    tool_input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    permission_mode: Option<String>,
}

impl From<HookInput> for PermissionCallbackRequest {
    fn from(input: HookInput) -> Self {
        Self {
            tool_name: input.tool_name,
            tool_input: input.tool_input,
            tool_use_id: input.tool_use_id,
            session_id: input.session_id,
            permission_mode: input.permission_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct HookSpecificOutput {
    hook_event_name: String,
    permission_decision: String,
    permission_decision_reason: String,
}

/// Decision printed to stdout for Claude
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct HookOutput {
    hook_specific_output: HookSpecificOutput,
}

impl HookOutput {
    fn deny(reason: String) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: "PreToolUse".to_string(),
                permission_decision: "deny".to_string(),
                permission_decision_reason: reason,
            },
        }
    }

    fn is_valid(&self) -> bool {
        matches!(
            self.hook_specific_output.permission_decision.as_str(),
            "allow" | "deny" | "ask"
        )
    }
}

struct PermissionClient {
    server_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl PermissionClient {
    fn from_env() -> Self {
        let server_url = env::var("WEBCHAT_SERVER_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let timeout_secs = env::var("WEBCHAT_HOOK_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    /// Forward the tool call and wait for the operator's decision
    async fn request_permission(&self, request: &PermissionCallbackRequest) -> Result<HookOutput, String> {
        let url = format!("{}/api/permission-request", self.server_url);
        debug!("Sending permission request to {}: {:?}", url, request);

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("Failed to reach webchat server: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("webchat server returned error status: {}", response.status()));
        }

        let output = response
            .json::<HookOutput>()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;

        if !output.is_valid() {
            return Err(format!(
                "Unexpected permission decision: {}",
                output.hook_specific_output.permission_decision
            ));
        }
        Ok(output)
    }
}

async fn read_input() -> Result<HookInput, String> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .map_err(|e| format!("Failed to read hook input: {}", e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid hook input: {}", e))
}

fn unavailable(reason: &str) -> HookOutput {
    HookOutput::deny(format!("Permission server unavailable: {}", reason))
}

async fn decide(client: &PermissionClient, input: HookInput) -> HookOutput {
    info!(
        "Permission request for tool '{}' (id: {:?})",
        input.tool_name, input.tool_use_id
    );

    let tool_name = input.tool_name.clone();
    match client.request_permission(&input.into()).await {
        Ok(output) => {
            info!(
                "Permission for '{}': {} ({})",
                tool_name,
                output.hook_specific_output.permission_decision,
                output.hook_specific_output.permission_decision_reason
            );
            output
        }
        Err(e) => {
            error!("Permission request failed: {}", e);
            unavailable(&e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout is the hook protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("webchat_hook=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = match read_input().await {
        Ok(input) => decide(&PermissionClient::from_env(), input).await,
        Err(e) => {
            error!("{}", e);
            unavailable(&e)
        }
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hook_input_maps_to_callback_request() {
        let input: HookInput = serde_json::from_value(json!({
            "session_id": "s-1",
            "transcript_path": "/tmp/t.jsonl",
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": { "command": "ls" },
            "tool_use_id": "toolu_1",
            "permission_mode": "default"
        }))
        .unwrap();

        let request = serde_json::to_value(PermissionCallbackRequest::from(input)).unwrap();
        assert_eq!(
            request,
            json!({
                "toolName": "Bash",
                "toolInput": { "command": "ls" },
                "toolUseId": "toolu_1",
                "sessionId": "s-1",
                "permissionMode": "default"
            })
        );
    }

    #[test]
    fn deny_matches_hook_schema() {
        let value = serde_json::to_value(HookOutput::deny("nope".into())).unwrap();
        assert_eq!(
            value,
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": "nope"
                }
            })
        );
    }

    #[test]
    fn rejects_unknown_decisions() {
        let mut output = HookOutput::deny("x".into());
        output.hook_specific_output.permission_decision = "maybe".into();
        assert!(!output.is_valid());
    }

    #[tokio::test]
    async fn unreachable_server_fails_closed() {
        // Bind and drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = PermissionClient {
            server_url: format!("http://127.0.0.1:{}", port),
            timeout: Duration::from_secs(5),
            client: reqwest::Client::new(),
        };
        let request = PermissionCallbackRequest {
            tool_name: "Bash".into(),
            tool_input: json!({}),
            tool_use_id: None,
            session_id: None,
            permission_mode: None,
        };

        let err = client.request_permission(&request).await.unwrap_err();
        assert!(err.contains("Failed to reach webchat server"), "got: {err}");

        let input: HookInput = serde_json::from_value(json!({
            "session_id": "s-1",
            "tool_name": "Bash",
            "tool_input": { "command": "ls" },
            "tool_use_id": "toolu_2"
        }))
        .unwrap();
        let value = serde_json::to_value(decide(&client, input).await).unwrap();

        let output = &value["hookSpecificOutput"];
        assert_eq!(output["hookEventName"], "PreToolUse");
        assert_eq!(output["permissionDecision"], "deny");
        let reason = output["permissionDecisionReason"].as_str().unwrap();
        assert!(
            reason.starts_with("Permission server unavailable: Failed to reach webchat server"),
            "got: {reason}"
        );
    }
}
