//! Gemini Live transport over a WebSocket.
//!
//! `connect` opens the socket, sends the setup message, and waits for
//! `setupComplete`; after that a background task pumps frames in both
//! directions until the server closes or the connection is cancelled.

use super::protocol::{ClientMessage, ServerMessage};
use super::{
    EVENT_CHANNEL_SIZE, LiveConnection, LiveConnector, OutboundMessage, RemoteEvent, SessionSetup,
    classify_remote_error,
};
use crate::config::LiveConfig;
use crate::error::{ErrorKind, Result, VoiceError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens sessions against the Gemini Live endpoint.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolved_api_key(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Connector for an explicit endpoint and key.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            connect_timeout,
        }
    }

    fn session_url(&self, key: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| VoiceError::Config(format!("invalid live endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::AuthorizationRequired("no API key configured".into()))?;
        let url = self.session_url(key)?;

        let ws = tokio::time::timeout(self.connect_timeout, open(url.as_str(), setup))
            .await
            .map_err(|_| {
                VoiceError::ConnectionFailed(format!(
                    "setup not acknowledged within {}s",
                    self.connect_timeout.as_secs()
                ))
            })??;
        info!(model = %setup.model, voice = %setup.voice_name, "live session open");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        tokio::spawn(run_transport(ws, outbound_rx, event_tx, cancel.clone()));
        Ok(LiveConnection::new(outbound_tx, event_rx, cancel))
    }
}

/// Connect, send setup, and wait for the acknowledgement.
async fn open(url: &str, setup: &SessionSetup) -> Result<WsStream> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| handshake_error(format!("connect: {e}")))?;

    let json = ClientMessage::from(setup).to_json()?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| handshake_error(format!("send setup: {e}")))?;

    loop {
        match ws.next().await {
            Some(Ok(msg)) => match decode_frame(msg) {
                Frame::Json(text) => {
                    let msg = ServerMessage::parse(&text)
                        .map_err(|e| VoiceError::ConnectionFailed(e.to_string()))?;
                    if msg.is_setup_complete() {
                        return Ok(ws);
                    }
                    debug!("ignoring message received before setupComplete");
                }
                Frame::Closed(reason) => {
                    return Err(handshake_error(
                        reason.unwrap_or_else(|| "connection closed during setup".into()),
                    ));
                }
                Frame::Control => {}
            },
            Some(Err(e)) => return Err(handshake_error(format!("read: {e}"))),
            None => {
                return Err(VoiceError::ConnectionFailed("connection closed during setup".into()));
            }
        }
    }
}

fn handshake_error(message: String) -> VoiceError {
    match classify_remote_error(&message, ErrorKind::ConnectionFailed) {
        ErrorKind::AuthorizationRequired => VoiceError::AuthorizationRequired(message),
        _ => VoiceError::ConnectionFailed(message),
    }
}

enum Frame {
    Json(String),
    Closed(Option<String>),
    Control,
}

/// JSON may arrive in text or binary frames.
fn decode_frame(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Json(text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Frame::Json(text),
            Err(_) => {
                debug!("ignoring non-UTF-8 binary frame");
                Frame::Control
            }
        },
        Message::Close(frame) => Frame::Closed(
            frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.trim().is_empty()),
        ),
        _ => Frame::Control,
    }
}

/// Pump frames until the server closes, the socket fails, or `cancel` fires.
///
/// A remote close with a reason yields `Error` then `Closed`; a local
/// cancel ends silently.
async fn run_transport(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::Sender<RemoteEvent>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws.split();

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!("close frame not sent: {e}");
                }
                debug!("live transport cancelled");
                return;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => match decode_frame(msg) {
                        Frame::Json(text) => match ServerMessage::parse(&text) {
                            Ok(parsed) => {
                                for event in parsed.into_events() {
                                    if events.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => debug!("ignoring unparseable server message: {e}"),
                        },
                        Frame::Closed(reason) => break reason,
                        Frame::Control => {}
                    },
                    Some(Err(e)) => break Some(format!("read error: {e}")),
                    None => break None,
                }
            }
            Some(message) = outbound.recv() => {
                let json = match ClientMessage::from(message).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("dropping outbound message: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    break Some(format!("send error: {e}"));
                }
            }
        }
    };

    cancel.cancel();
    match &reason {
        Some(r) => warn!("live session ended: {r}"),
        None => info!("live session closed by server"),
    }
    if let Some(message) = reason.clone() {
        let _ = events.send(RemoteEvent::Error { message }).await;
    }
    let _ = events.send(RemoteEvent::Closed { reason }).await;
}
