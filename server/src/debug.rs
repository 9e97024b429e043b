use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "webchat=debug,webchat_lib=debug,info";

/// Install the global subscriber: stderr always, plus the debug log file when configured.
/// The file is truncated on start.
pub fn init_logging(log_path: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = log_path.and_then(|path| match clear_log(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("[webchat] Failed to open log file {}: {}", path.display(), e);
            None
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}

/// Create (or truncate) the log file and write the session header.
fn clear_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    writeln!(file, "=== webchat debug log started ===")?;
    writeln!(file, "Time: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file)?;
    Ok(file)
}
