//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives the widget, and writes `ResponseEnvelope` and `EventEnvelope`
//! messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel. Set `LEADCALL_CONFIG` to load a config file
//! other than the default one.

use leadcall::diagnostics::init_logging;
use leadcall::host::stdio::run_stdio_bridge;
use leadcall::{AssistantConfig, Backends, Widget};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging(None);

    tracing::info!("leadcall-host starting");

    let config_path = std::env::var_os("LEADCALL_CONFIG").map(PathBuf::from);
    let config = AssistantConfig::load(config_path.as_deref())?;
    let host = config.host.clone();
    let backends = Backends::production(&config)?;

    let (widget, handle) = Widget::new(config, backends);
    let cancel = CancellationToken::new();
    let widget_task = tokio::spawn(widget.run(cancel.clone()));

    let result = run_stdio_bridge(handle, host).await;
    cancel.cancel();
    let _ = widget_task.await;

    result.map_err(|e| {
        tracing::error!(error = %e, "leadcall-host exited with error");
        anyhow::anyhow!("leadcall-host failed: {e}")
    })?;

    tracing::info!("leadcall-host shut down cleanly");
    Ok(())
}
