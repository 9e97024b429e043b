use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, warn};
use webchat_lib::config::{self, WebchatConfig};

#[derive(Parser, Debug)]
#[command(
    name = "webchat",
    about = "Local web chat for Claude Code with browser-side tool approvals",
    long_about = None,
)]
struct Args {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file (default: <config dir>/webchat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the claude binary
    #[arg(long)]
    claude_bin: Option<String>,

    /// Debug log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config is read before logging exists; report the outcome once it does
    let config_path = args.config.clone().or_else(config::config_path);
    let loaded = config_path.as_deref().map(config::read_config_file);

    let mut config = match loaded {
        Some(Ok(Some(ref file_config))) => file_config.clone(),
        _ => WebchatConfig::default(),
    };
    config = config::apply_env_overrides(config);
    apply_args(&mut config, args);

    webchat_lib::debug::init_logging(config.debug_log_path.as_deref());

    match (config_path, loaded) {
        (Some(path), Some(Ok(Some(_)))) => debug!(path = %path.display(), "loaded config"),
        (Some(path), Some(Ok(None))) => debug!(path = %path.display(), "no config file, using defaults"),
        (_, Some(Err(e))) => warn!(error = %e, "failed to load config, using defaults"),
        _ => debug!("no config directory, using defaults"),
    }

    webchat_lib::run(config).await?;
    Ok(())
}

fn apply_args(config: &mut WebchatConfig, args: Args) {
    if let Some(host) = args.host {
        config.host = Some(host);
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(claude_bin) = args.claude_bin {
        config.claude_binary = Some(claude_bin);
    }
    if let Some(log_file) = args.log_file {
        config.debug_log_path = Some(log_file);
    }
}
