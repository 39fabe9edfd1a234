//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages, routes them to
//! the widget, and writes `ResponseEnvelope` and `EventEnvelope` messages as
//! newline-delimited JSON.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::config::HostConfig;
use crate::error::{Result, VoiceError};
use crate::host::contract::{CommandEnvelope, EventEnvelope, ResponseEnvelope};
use crate::host::router::HostRouter;
use crate::widget::WidgetHandle;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;

/// Run the bridge on the process's stdin/stdout until stdin closes.
///
/// # Errors
///
/// Returns an error if stdin cannot be read or stdout cannot be written.
pub async fn run_stdio_bridge(widget: WidgetHandle, host: HostConfig) -> Result<()> {
    run_bridge(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        widget,
        host,
    )
    .await
}

/// Run the bridge over arbitrary streams until `reader` reaches EOF.
///
/// Two tasks operate concurrently:
///
/// 1. **Reader** (this task): parses each line, routes it, and writes the
///    response.
/// 2. **Event forwarder** (spawned): maps broadcast widget events to event
///    envelopes and writes them.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
pub async fn run_bridge<R, W>(
    reader: R,
    writer: W,
    widget: WidgetHandle,
    host: HostConfig,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));

    let event_writer = Arc::clone(&writer);
    let mut event_rx = widget.subscribe();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let Some(envelope) = EventEnvelope::from_widget(&event, &host) else {
                        continue;
                    };
                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            let mut w = event_writer.lock().await;
                            if let Err(e) = write_line(&mut *w, &json).await {
                                tracing::warn!(
                                    error = %e,
                                    "failed to write event envelope; stopping event forwarder"
                                );
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "failed to serialize event envelope; skipping"
                            );
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("widget event channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let router = HostRouter::new(widget);
    let reader_result = run_reader(reader, &router, &writer).await;

    event_handle.abort();
    let _ = event_handle.await;
    reader_result
}

async fn run_reader<R, W>(mut reader: R, router: &HostRouter, writer: &Mutex<W>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| VoiceError::Channel(format!("failed to read command line: {e}")))?;
        if bytes_read == 0 {
            tracing::info!("input closed (EOF); shutting down host bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<CommandEnvelope>(trimmed) {
            Ok(envelope) => router.route(&envelope).await,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                )
            }
        };

        let json = serde_json::to_string(&response)
            .map_err(|e| VoiceError::Protocol(format!("failed to serialize response: {e}")))?;
        let mut w = writer.lock().await;
        write_line(&mut *w, &json).await?;
    }
    Ok(())
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| VoiceError::Channel(format!("failed to write line: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| VoiceError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| VoiceError::Channel(format!("failed to flush: {e}")))?;
    Ok(())
}
