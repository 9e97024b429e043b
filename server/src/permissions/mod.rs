pub mod broker;
pub mod types;

pub use broker::{PermissionBroker, DEFAULT_PERMISSION_TIMEOUT};
pub use types::{
    PendingPermission, PermissionDecision, PermissionEvent, PermissionMode, PermissionRequestBody,
    PermissionResponse,
};

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const HOOK_BINARY_NAME: &str = "webchat-hook";

/// Extra seconds the CLI gives the hook beyond the broker's own timeout,
/// so the broker's deny reaches the CLI before the CLI gives up.
const HOOK_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Claude settings JSON registering the hook helper for every PreToolUse.
pub fn hook_settings(hook_binary_path: &str, permission_timeout: Duration) -> serde_json::Value {
    serde_json::json!({
        "hooks": {
            "PreToolUse": [
                {
                    "matcher": "*",
                    "hooks": [
                        {
                            "type": "command",
                            "command": hook_binary_path,
                            "timeout": permission_timeout.as_secs() + HOOK_TIMEOUT_MARGIN_SECS
                        }
                    ]
                }
            ]
        }
    })
}

/// Write the hook settings file the CLI is pointed at with `--settings`.
/// Returns the written path.
pub fn write_hook_settings(
    settings_path: &Path,
    hook_binary_path: &str,
    permission_timeout: Duration,
) -> Result<PathBuf> {
    if let Some(parent) = settings_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(&hook_settings(hook_binary_path, permission_timeout))?;
    fs::write(settings_path, content)?;

    debug!(path = %settings_path.display(), "wrote hook settings");
    Ok(settings_path.to_path_buf())
}

/// Locate the webchat-hook binary.
/// Installed: next to the server executable. Development: the workspace target dir.
pub fn find_hook_binary() -> Option<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            let sibling = parent.join(HOOK_BINARY_NAME);
            if sibling.is_file() {
                return Some(sibling);
            }
        }
    }

    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let workspace_root = Path::new(manifest_dir).parent()?;

    ["target/release", "target/debug"]
        .iter()
        .map(|dir| workspace_root.join(dir).join(HOOK_BINARY_NAME))
        .find(|path| path.is_file())
}
