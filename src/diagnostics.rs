//! Logging setup shared by the binaries.
//!
//! Everything goes to stderr (stdout belongs to the host protocol). An
//! optional daily-rolling file log is written through `tracing-appender`.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "leadcall=info,tungstenite=warn,reqwest=warn";

/// File name prefix of the rolling log.
const LOG_FILE_PREFIX: &str = "leadcall.log";

/// Keeps the file writer flushing; drop it at the end of `main`.
#[must_use = "dropping the guard stops the file log"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// `<data-local-dir>/leadcall/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("leadcall").join("logs"))
}

/// Install the global subscriber. A second call is a no-op.
///
/// When `log_dir` is given, a daily-rolling file log is written there in
/// addition to stderr; a directory that cannot be created is reported on
/// stderr and skipped.
pub fn init_logging(log_dir: Option<&Path>) -> LogGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        Err(e) => {
            eprintln!("file logging disabled, cannot create {}: {e}", dir.display());
            None
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LogGuard { _file: guard }
}
