pub mod claude;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod permissions;
pub mod routes;

use claude::{CliSettings, ProcessRegistry};
use config::WebchatConfig;
use error::Result;
use permissions::PermissionBroker;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Everything the handlers share, built once at startup.
pub struct AppContext {
    pub config: WebchatConfig,
    pub broker: PermissionBroker,
    pub processes: Arc<ProcessRegistry>,
    pub cli: CliSettings,
}

impl AppContext {
    pub fn new(config: WebchatConfig, server_url: String, hook_settings_path: Option<PathBuf>) -> Self {
        let cli = CliSettings {
            claude_binary: config.resolve_claude_binary(),
            hook_settings_path,
            server_url,
            default_working_directory: config.working_directory(),
            default_permission_mode: config.default_permission_mode(),
            permission_timeout: config.permission_timeout(),
        };

        Self {
            broker: PermissionBroker::new(config.permission_timeout()),
            processes: Arc::new(ProcessRegistry::new()),
            cli,
            config,
        }
    }
}

/// Write the hook settings file, unless the hook is disabled or can't be found.
/// `hookBinary = "none"` turns the approval hook off.
pub fn prepare_hook_settings(config: &WebchatConfig) -> Option<PathBuf> {
    let hook_binary = match config.hook_binary.as_deref() {
        Some(path) if path.is_empty() || path.eq_ignore_ascii_case("none") => {
            info!("permission hook disabled by config");
            return None;
        }
        Some(path) => PathBuf::from(path),
        None => match permissions::find_hook_binary() {
            Some(path) => path,
            None => {
                warn!(
                    "{} binary not found, tool approvals will use the CLI's own prompts. Run `cargo build -p webchat-hook` first.",
                    permissions::HOOK_BINARY_NAME
                );
                return None;
            }
        },
    };

    info!(path = %hook_binary.display(), "using permission hook");
    match permissions::write_hook_settings(
        &config::hook_settings_path(),
        &hook_binary.to_string_lossy(),
        config.permission_timeout(),
    ) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "failed to write hook settings");
            None
        }
    }
}

/// Bind the listener and serve in a background task.
/// Returns the bound address and the shared context.
pub async fn start_server(config: WebchatConfig) -> Result<(SocketAddr, Arc<AppContext>)> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    let hook_settings = prepare_hook_settings(&config);
    let ctx = Arc::new(AppContext::new(config, callback_url(addr), hook_settings));
    let router = routes::router(ctx.clone());

    info!(%addr, "webchat server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "server error");
        }
    });

    Ok((addr, ctx))
}

/// URL the hook helper uses to reach us; wildcard binds are reached over loopback.
pub fn callback_url(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("http://127.0.0.1:{}", addr.port())
    } else {
        format!("http://{}", addr)
    }
}

/// Serve until Ctrl-C.
pub async fn run(config: WebchatConfig) -> Result<()> {
    let (addr, _ctx) = start_server(config).await?;
    println!("webchat listening on http://{}", addr);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
