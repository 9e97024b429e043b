use serde::{Deserialize, Serialize};

pub const HOOK_EVENT_NAME: &str = "PreToolUse";

pub const REASON_USER_APPROVED: &str = "User approved";
pub const REASON_USER_DENIED: &str = "User denied";
pub const REASON_TIMED_OUT: &str = "Permission request timed out";
pub const REASON_BYPASS: &str = "Bypass permissions mode";
pub const REASON_SESSION_APPROVED: &str = "Approved for session";
pub const REASON_CANCELLED: &str = "Permission request cancelled";

/// Claude CLI permission mode, spelled the way the CLI spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "String")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, PermissionMode::BypassPermissions)
    }
}

/// Unknown modes fall back to `default` so a newer CLI never bypasses approval by accident.
impl From<String> for PermissionMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "acceptEdits" => PermissionMode::AcceptEdits,
            "plan" => PermissionMode::Plan,
            "bypassPermissions" => PermissionMode::BypassPermissions,
            _ => PermissionMode::Default,
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/permission-request`, sent by the hook helper.
/// Snake-case aliases accept Claude's raw hook input as well.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestBody {
    #[serde(alias = "tool_name")]
    pub tool_name: String,
    #[serde(default, alias = "tool_input")]
    pub tool_input: serde_json::Value,
    #[serde(default, alias = "tool_use_id")]
    pub tool_use_id: Option<String>,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, alias = "permission_mode")]
    pub permission_mode: Option<PermissionMode>,
}

/// Body of `POST /api/permission-respond`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub id: String,
    pub allow: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Auto-approve this tool for the rest of the session
    #[serde(default)]
    pub allow_for_session: bool,
}

impl PermissionResponse {
    pub fn new(id: impl Into<String>, allow: bool) -> Self {
        Self {
            id: id.into(),
            allow,
            message: None,
            allow_for_session: false,
        }
    }
}

/// A permission request as registered with the broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPermission {
    pub id: String,
    pub session_id: Option<String>,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    /// Creation time, epoch millis
    pub timestamp: i64,
}

impl PendingPermission {
    /// Build from a hook call, generating an id when the hook didn't send a tool-use id.
    pub fn from_body(body: PermissionRequestBody) -> Self {
        Self {
            id: body
                .tool_use_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            session_id: body.session_id,
            tool_name: body.tool_name,
            tool_input: body.tool_input,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub permission_decision: DecisionKind,
    pub permission_decision_reason: String,
}

/// Decision returned to the hook, shaped as the PreToolUse hook output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub hook_specific_output: HookSpecificOutput,
}

impl PermissionDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self::new(DecisionKind::Allow, reason.into())
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(DecisionKind::Deny, reason.into())
    }

    fn new(kind: DecisionKind, reason: String) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: HOOK_EVENT_NAME.to_string(),
                permission_decision: kind,
                permission_decision_reason: reason,
            },
        }
    }

    /// Decision for an operator response, falling back to the stock reasons.
    pub fn from_response(response: &PermissionResponse) -> Self {
        let message = response.message.clone().filter(|m| !m.trim().is_empty());
        if response.allow {
            Self::allow(message.unwrap_or_else(|| REASON_USER_APPROVED.to_string()))
        } else {
            Self::deny(message.unwrap_or_else(|| REASON_USER_DENIED.to_string()))
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.hook_specific_output.permission_decision == DecisionKind::Allow
    }

    pub fn reason(&self) -> &str {
        &self.hook_specific_output.permission_decision_reason
    }
}

/// Broadcast to UI subscribers of `/api/permission-events`.
#[derive(Clone, Serialize, Debug)]
#[serde(tag = "type")]
pub enum PermissionEvent {
    #[serde(rename = "permission.requested")]
    Requested { request: PendingPermission },
    #[serde(rename = "permission.resolved")]
    Resolved {
        id: String,
        allowed: bool,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decision_matches_hook_schema() {
        let decision = PermissionDecision::allow(REASON_USER_APPROVED);
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(
            value,
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "allow",
                    "permissionDecisionReason": "User approved"
                }
            })
        );
    }

    #[test]
    fn request_body_accepts_raw_hook_input() {
        let raw = json!({
            "session_id": "sess-1",
            "tool_name": "Bash",
            "tool_input": { "command": "ls" },
            "tool_use_id": "toolu_01",
            "permission_mode": "acceptEdits",
            "hook_event_name": "PreToolUse"
        });
        let body: PermissionRequestBody = serde_json::from_value(raw).unwrap();
        assert_eq!(body.tool_name, "Bash");
        assert_eq!(body.session_id.as_deref(), Some("sess-1"));
        assert_eq!(body.tool_use_id.as_deref(), Some("toolu_01"));
        assert_eq!(body.permission_mode, Some(PermissionMode::AcceptEdits));
    }

    #[test]
    fn unknown_permission_mode_falls_back_to_default() {
        let mode: PermissionMode = serde_json::from_value(json!("yolo")).unwrap();
        assert_eq!(mode, PermissionMode::Default);
        let mode: PermissionMode = serde_json::from_value(json!("bypassPermissions")).unwrap();
        assert!(mode.is_bypass());
        assert_eq!(serde_json::to_value(mode).unwrap(), json!("bypassPermissions"));
    }

    #[test]
    fn missing_tool_use_id_generates_one() {
        let body: PermissionRequestBody =
            serde_json::from_value(json!({ "toolName": "Write", "toolUseId": "" })).unwrap();
        let pending = PendingPermission::from_body(body);
        assert!(!pending.id.is_empty());
        assert!(uuid::Uuid::parse_str(&pending.id).is_ok());
    }

    #[test]
    fn blank_message_uses_stock_reason() {
        let mut response = PermissionResponse::new("x", false);
        response.message = Some("  ".into());
        assert_eq!(PermissionDecision::from_response(&response).reason(), REASON_USER_DENIED);

        response.message = Some("not in prod".into());
        assert_eq!(PermissionDecision::from_response(&response).reason(), "not in prod");
    }
}
