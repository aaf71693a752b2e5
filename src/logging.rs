use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

const LOG_FILE: &str = "ytdx.log";

/// Sends tracing output to `<dir>/ytdx.log`; the terminal belongs to the UI.
/// `RUST_LOG` overrides the default `ytdx=info` filter. Keep the returned
/// guard alive until exit or buffered lines are lost.
pub fn init_tracing(dir: &Path) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ytdx=info".into());

    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("Failed to create log directory: {err}");
        return None;
    }

    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init();

    Some(guard)
}
