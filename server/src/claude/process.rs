use super::registry::ProcessHandle;
use crate::config::claude_not_found_error;
use crate::error::{Result, WebchatError};
use crate::events::ChatEvent;
use crate::permissions::PermissionMode;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Env var telling the hook helper where to call back.
pub const SERVER_URL_ENV: &str = "WEBCHAT_SERVER_URL";

/// Env var carrying the hook helper's HTTP timeout in seconds.
pub const HOOK_TIMEOUT_ENV: &str = "WEBCHAT_HOOK_TIMEOUT";

/// The helper outwaits the broker so the broker's own timeout deny arrives first.
const HOOK_CLIENT_MARGIN: Duration = Duration::from_secs(5);

const STDERR_TAIL_LINES: usize = 20;
const LOG_LINE_LIMIT: usize = 300;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
    /// CLI session to resume
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub model: Option<String>,
}

/// How every CLI process is launched, fixed at startup.
#[derive(Debug, Clone)]
pub struct CliSettings {
    pub claude_binary: String,
    pub hook_settings_path: Option<PathBuf>,
    pub server_url: String,
    pub default_working_directory: PathBuf,
    pub default_permission_mode: PermissionMode,
    /// How long the broker waits for a decision
    pub permission_timeout: Duration,
}

/// A fully resolved command line for one chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct CliInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub env: Vec<(String, String)>,
    pub resume_session: Option<String>,
}

impl CliSettings {
    pub fn invocation(&self, request: &ChatRequest) -> Result<CliInvocation> {
        if request.message.trim().is_empty() {
            return Err(WebchatError::InvalidRequest {
                reason: "message must not be empty".to_string(),
            });
        }

        let working_directory = request
            .working_directory
            .clone()
            .unwrap_or_else(|| self.default_working_directory.clone());
        if !working_directory.is_dir() {
            return Err(WebchatError::InvalidRequest {
                reason: format!("working directory does not exist: {}", working_directory.display()),
            });
        }

        let mode = request.permission_mode.unwrap_or(self.default_permission_mode);
        let resume_session = request.session_id.clone().filter(|id| !id.is_empty());

        Ok(CliInvocation {
            program: self.claude_binary.clone(),
            args: build_cli_args(
                &request.message,
                mode,
                resume_session.as_deref(),
                request.model.as_deref(),
                self.hook_settings_path.as_ref().map(|p| p.to_string_lossy().to_string()).as_deref(),
            ),
            working_directory,
            env: vec![
                (SERVER_URL_ENV.to_string(), self.server_url.clone()),
                (
                    HOOK_TIMEOUT_ENV.to_string(),
                    (self.permission_timeout + HOOK_CLIENT_MARGIN).as_secs().to_string(),
                ),
            ],
            resume_session,
        })
    }
}

/// Arguments for one non-interactive CLI run.
/// stdin stays closed; follow-up messages are new processes using `--resume`.
pub fn build_cli_args(
    message: &str,
    mode: PermissionMode,
    resume_session: Option<&str>,
    model: Option<&str>,
    settings_path: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        message.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--permission-mode".to_string(),
        mode.as_str().to_string(),
    ];

    if let Some(resume_id) = resume_session {
        args.push("--resume".to_string());
        args.push(resume_id.to_string());
    }

    if let Some(model_name) = model {
        args.push("--model".to_string());
        args.push(model_name.to_string());
    }

    if let Some(path) = settings_path {
        args.push("--settings".to_string());
        args.push(path.to_string());
    }

    args
}

/// Session id announced by a `system` init event.
pub fn session_id_from_event(event: &serde_json::Value) -> Option<&str> {
    if event.get("type").and_then(|v| v.as_str()) != Some("system") {
        return None;
    }
    event.get("session_id").and_then(|v| v.as_str())
}

/// Run one CLI process to completion, streaming its output as [`ChatEvent`]s.
///
/// Always ends with exactly one terminal event: completed, aborted or error.
/// The registry entry is released when `handle` drops at the end.
pub async fn run_cli(invocation: CliInvocation, mut handle: ProcessHandle, tx: mpsc::Sender<ChatEvent>) {
    let request_id = handle.request_id().to_string();
    let _ = tx
        .send(ChatEvent::ChatStarted {
            request_id: request_id.clone(),
        })
        .await;

    info!(
        request_id = %request_id,
        program = %invocation.program,
        cwd = %invocation.working_directory.display(),
        "spawning cli"
    );
    debug!(request_id = %request_id, args = ?invocation.args, "cli arguments");

    let mut child = match spawn(&invocation) {
        Ok(child) => child,
        Err(err) => {
            error!(request_id = %request_id, error = %err, "spawn failed");
            let _ = tx
                .send(ChatEvent::ChatError {
                    request_id,
                    error: err.to_string(),
                    exit_code: None,
                })
                .await;
            return;
        }
    };

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(forward_stderr(stderr, request_id.clone(), tx.clone())));

    let mut current_session = invocation.resume_session.clone();
    if let Some(ref session_id) = current_session {
        let _ = tx
            .send(ChatEvent::SessionStarted {
                request_id: request_id.clone(),
                session_id: session_id.clone(),
            })
            .await;
    }

    let mut kill_requested = false;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        let mut line_count = 0usize;
        let mut client_gone = false;

        loop {
            let killed = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        line_count += 1;
                        debug!(request_id = %request_id, line = line_count, "stdout: {}", truncate_for_log(&line));
                        let delivered = forward_stdout_line(&line, &request_id, &mut current_session, &tx).await;
                        if delivered || kill_requested {
                            continue;
                        }
                        warn!(request_id = %request_id, "chat stream closed by client, terminating cli");
                        client_gone = true;
                        true
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "stdout read error");
                        break;
                    }
                },
                signal = &mut handle.kill_rx, if !kill_requested => signal.is_ok(),
            };
            kill_requested = true;
            if client_gone {
                handle.mark_aborted();
            }
            if killed {
                terminate(&mut child);
            }
        }
        debug!(request_id = %request_id, lines = line_count, "stdout closed");
    }

    let status = loop {
        let killed = tokio::select! {
            status = child.wait() => break status,
            signal = &mut handle.kill_rx, if !kill_requested => signal.is_ok(),
        };
        kill_requested = true;
        if killed {
            terminate(&mut child);
        }
    };

    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    let terminal = match status {
        _ if handle.is_aborted() => {
            info!(request_id = %request_id, "cli aborted");
            ChatEvent::ChatAborted {
                request_id: request_id.clone(),
            }
        }
        Ok(status) if status.success() => {
            info!(request_id = %request_id, "cli finished");
            ChatEvent::ChatCompleted {
                request_id: request_id.clone(),
                exit_code: status.code(),
            }
        }
        Ok(status) => {
            warn!(request_id = %request_id, code = ?status.code(), "cli failed");
            ChatEvent::ChatError {
                request_id: request_id.clone(),
                error: failure_message(status.code(), &stderr_tail),
                exit_code: status.code(),
            }
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "failed to wait for cli");
            ChatEvent::ChatError {
                request_id: request_id.clone(),
                error: format!("Failed to wait for process: {}", e),
                exit_code: None,
            }
        }
    };

    debug_assert!(terminal.is_terminal());
    let _ = tx.send(terminal).await;
}

fn spawn(invocation: &CliInvocation) -> Result<Child> {
    Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&invocation.working_directory)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WebchatError::ClaudeNotFound(claude_not_found_error())
            } else {
                WebchatError::Spawn {
                    reason: e.to_string(),
                }
            }
        })
}

/// Returns false once the receiving side has gone away.
async fn forward_stdout_line(
    line: &str,
    request_id: &str,
    current_session: &mut Option<String>,
    tx: &mpsc::Sender<ChatEvent>,
) -> bool {
    let event = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(event) => event,
        Err(e) => {
            debug!(request_id = %request_id, error = %e, "skipping non-json stdout line");
            return !tx.is_closed();
        }
    };

    if let Some(session_id) = session_id_from_event(&event) {
        if current_session.as_deref() != Some(session_id) {
            *current_session = Some(session_id.to_string());
            let started = ChatEvent::SessionStarted {
                request_id: request_id.to_string(),
                session_id: session_id.to_string(),
            };
            if tx.send(started).await.is_err() {
                return false;
            }
        }
    }

    tx.send(ChatEvent::CliEvent {
        request_id: request_id.to_string(),
        event,
    })
    .await
    .is_ok()
}

/// Log and forward stderr; returns the last lines for error reports.
async fn forward_stderr(stderr: ChildStderr, request_id: String, tx: mpsc::Sender<ChatEvent>) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.is_empty() => {}
            Ok(Some(line)) => {
                debug!(request_id = %request_id, "stderr: {}", truncate_for_log(&line));
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
                let _ = tx
                    .send(ChatEvent::CliStderr {
                        request_id: request_id.clone(),
                        line,
                    })
                    .await;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "stderr read error");
                break;
            }
        }
    }

    tail.into_iter().collect()
}

fn failure_message(code: Option<i32>, stderr_tail: &[String]) -> String {
    let status = match code {
        Some(code) => format!("Claude exited with code {}", code),
        None => "Claude was terminated by a signal".to_string(),
    };
    if stderr_tail.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr_tail.join("\n"))
    }
}

/// SIGTERM on unix so the CLI can shut down cleanly.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            debug!(pid, "sending SIGTERM");
            // SAFETY: pid is our own child and has not been reaped yet
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }
    }

    let _ = child.start_kill();
}

fn truncate_for_log(line: &str) -> &str {
    if line.len() <= LOG_LINE_LIMIT {
        return line;
    }
    let mut end = LOG_LINE_LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
