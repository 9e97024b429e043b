use serde::Serialize;

/// Events streamed to the browser over `POST /api/chat`.
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "chat.started")]
    ChatStarted {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// First `system` event that names the CLI session; use it to `--resume` later.
    #[serde(rename = "session.started")]
    SessionStarted {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// One line of the CLI's stream-json output, passed through untouched.
    #[serde(rename = "cli.event")]
    CliEvent {
        #[serde(rename = "requestId")]
        request_id: String,
        event: serde_json::Value,
    },
    #[serde(rename = "cli.stderr")]
    CliStderr {
        #[serde(rename = "requestId")]
        request_id: String,
        line: String,
    },
    #[serde(rename = "chat.completed")]
    ChatCompleted {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    #[serde(rename = "chat.aborted")]
    ChatAborted {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    #[serde(rename = "chat.error")]
    ChatError {
        #[serde(rename = "requestId")]
        request_id: String,
        error: String,
        #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl ChatEvent {
    /// True for the event that ends a chat stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::ChatCompleted { .. } | ChatEvent::ChatAborted { .. } | ChatEvent::ChatError { .. }
        )
    }
}
