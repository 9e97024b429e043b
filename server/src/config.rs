use crate::error::{Result, WebchatError};
use crate::permissions::{PermissionMode, DEFAULT_PERMISSION_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3131;

/// User-configurable settings for webchat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct WebchatConfig {
    /// Address to bind (default: 127.0.0.1)
    pub host: Option<String>,
    /// Port to bind (default: 3131)
    pub port: Option<u16>,
    /// Path to Claude CLI binary (default: auto-detected, then "claude")
    pub claude_binary: Option<String>,
    /// Path to the webchat-hook binary (default: next to the server binary)
    pub hook_binary: Option<String>,
    /// Directory the CLI runs in when a chat request names none
    pub working_directory: Option<PathBuf>,
    /// Seconds to wait for a human permission decision (default: 300)
    pub permission_timeout_secs: Option<u64>,
    /// Mode used when a chat request names none
    pub default_permission_mode: Option<PermissionMode>,
    /// Debug log file (None = stderr only)
    pub debug_log_path: Option<PathBuf>,
}

impl WebchatConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    pub fn permission_timeout(&self) -> Duration {
        self.permission_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PERMISSION_TIMEOUT)
    }

    pub fn default_permission_mode(&self) -> PermissionMode {
        self.default_permission_mode.unwrap_or_default()
    }

    /// Configured working directory, else the server's own.
    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve the claude binary path.
    /// Priority: 1) User config, 2) Auto-detected path, 3) "claude" (PATH lookup)
    pub fn resolve_claude_binary(&self) -> String {
        if let Some(ref configured) = self.claude_binary {
            debug!(path = %configured, "using configured claude binary");
            return configured.clone();
        }

        if let Some(found) = find_claude_binary() {
            return found;
        }

        debug!("claude not found in common paths, falling back to PATH lookup");
        "claude".to_string()
    }
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("webchat"))
}

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Where the generated hook settings live
pub fn hook_settings_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| std::env::temp_dir().join("webchat"))
        .join("hook-settings.json")
}

/// Read a config file. A missing file is `Ok(None)`.
pub fn read_config_file(path: &Path) -> Result<Option<WebchatConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    toml::from_str::<WebchatConfig>(&content)
        .map(Some)
        .map_err(|e| WebchatError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Apply environment variable overrides
pub fn apply_env_overrides(config: WebchatConfig) -> WebchatConfig {
    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides(mut config: WebchatConfig, var: impl Fn(&str) -> Option<String>) -> WebchatConfig {
    if let Some(val) = var("WEBCHAT_HOST") {
        config.host = Some(val);
    }
    if let Some(port) = var("WEBCHAT_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.port = Some(port);
    }
    if let Some(val) = var("WEBCHAT_CLAUDE_BIN") {
        config.claude_binary = Some(val);
    }
    if let Some(val) = var("WEBCHAT_HOOK_BIN") {
        config.hook_binary = Some(val);
    }
    if let Some(val) = var("WEBCHAT_WORKING_DIR") {
        config.working_directory = Some(PathBuf::from(val));
    }
    if let Some(secs) = var("WEBCHAT_PERMISSION_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
        config.permission_timeout_secs = Some(secs);
    }
    if let Some(val) = var("WEBCHAT_DEBUG_LOG") {
        if val.is_empty() || val.eq_ignore_ascii_case("none") {
            config.debug_log_path = None;
        } else {
            config.debug_log_path = Some(PathBuf::from(val));
        }
    }
    config
}

/// Common locations where claude CLI might be installed
fn claude_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = dirs::home_dir() {
        // Native installer - highest priority
        paths.push(home.join(".claude/bin/claude"));
        paths.push(home.join(".claude/local/bin/claude"));

        // User-local installations
        paths.push(home.join(".local/bin/claude"));
        paths.push(home.join(".bun/bin/claude"));
        paths.push(home.join(".npm-global/bin/claude"));
        paths.push(home.join(".nvm/current/bin/claude"));
        paths.push(home.join(".volta/bin/claude"));
    }

    paths.push(PathBuf::from("/opt/homebrew/bin/claude"));
    paths.push(PathBuf::from("/usr/local/bin/claude"));
    paths.push(PathBuf::from("/usr/bin/claude"));

    paths
}

fn find_claude_binary() -> Option<String> {
    claude_search_paths()
        .into_iter()
        .find(|path| path.is_file())
        .map(|path| {
            let path_str = path.to_string_lossy().to_string();
            debug!(path = %path_str, "found claude");
            path_str
        })
}

/// Message shown when the claude binary can't be spawned
pub fn claude_not_found_error() -> String {
    let searched: Vec<String> = claude_search_paths()
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect();

    let config_path = config_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "~/.config/webchat/config.toml".to_string());

    format!(
        "Claude CLI not found.\n\n\
        Searched:\n{}\n\n\
        To fix:\n\
        1. Install Claude Code: curl -fsSL https://claude.ai/install.sh | bash\n\
        2. Or set WEBCHAT_CLAUDE_BIN\n\
        3. Or set the path in:\n   {}\n\n   \
        Add: claudeBinary = \"/path/to/claude\"",
        searched.join("\n"),
        config_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_deserializes_from_camel_case_toml() {
        let toml = r#"
            host = "0.0.0.0"
            port = 8080
            claudeBinary = "/opt/homebrew/bin/claude"
            permissionTimeoutSecs = 60
            defaultPermissionMode = "acceptEdits"
        "#;

        let config: WebchatConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.claude_binary.as_deref(), Some("/opt/homebrew/bin/claude"));
        assert_eq!(config.permission_timeout(), Duration::from_secs(60));
        assert_eq!(config.default_permission_mode(), PermissionMode::AcceptEdits);
    }

    #[test]
    fn config_defaults_work() {
        let config: WebchatConfig = toml::from_str("").unwrap();

        assert_eq!(config.host(), DEFAULT_HOST);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.permission_timeout(), Duration::from_secs(300));
        assert_eq!(config.default_permission_mode(), PermissionMode::Default);
        assert_eq!(config.debug_log_path, None);
    }

    #[test]
    fn config_serializes_to_camel_case() {
        let config = WebchatConfig {
            claude_binary: Some("/usr/bin/claude".to_string()),
            permission_timeout_secs: Some(120),
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("claudeBinary"), "expected camelCase: {}", json);
        assert!(json.contains("permissionTimeoutSecs"), "expected camelCase: {}", json);
        assert!(!json.contains("claude_binary"), "got snake_case: {}", json);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WEBCHAT_PORT", "9000"),
            ("WEBCHAT_CLAUDE_BIN", "/tmp/claude"),
            ("WEBCHAT_PERMISSION_TIMEOUT", "30"),
            ("WEBCHAT_DEBUG_LOG", "none"),
        ]);
        let base = WebchatConfig {
            port: Some(1234),
            debug_log_path: Some(PathBuf::from("/tmp/webchat.log")),
            ..Default::default()
        };

        let config = apply_overrides(base, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.port(), 9000);
        assert_eq!(config.claude_binary.as_deref(), Some("/tmp/claude"));
        assert_eq!(config.permission_timeout(), Duration::from_secs(30));
        assert_eq!(config.debug_log_path, None);
    }

    #[test]
    fn invalid_env_numbers_are_ignored() {
        let config = apply_overrides(WebchatConfig::default(), |key| match key {
            "WEBCHAT_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.port(), DEFAULT_PORT);
    }

    #[test]
    fn read_config_file_handles_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(read_config_file(&missing).unwrap().is_none());

        let invalid = dir.path().join("invalid.toml");
        fs::write(&invalid, "port = \"lots\"").unwrap();
        let err = read_config_file(&invalid).unwrap_err();
        assert!(matches!(err, WebchatError::Config { .. }));

        let valid = dir.path().join("valid.toml");
        fs::write(&valid, "port = 4000").unwrap();
        assert_eq!(read_config_file(&valid).unwrap().unwrap().port(), 4000);
    }

    #[test]
    fn configured_binary_wins() {
        let config = WebchatConfig {
            claude_binary: Some("/custom/claude".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_claude_binary(), "/custom/claude");
    }

    #[test]
    fn search_paths_include_common_locations() {
        let paths = claude_search_paths();
        let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();

        assert!(path_strs.iter().any(|p| p == "/opt/homebrew/bin/claude"),
            "missing homebrew path");
        assert!(path_strs.iter().any(|p| p == "/usr/local/bin/claude"),
            "missing /usr/local/bin path");
    }
}
