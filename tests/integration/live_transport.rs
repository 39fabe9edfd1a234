//! Gemini Live transport against a local WebSocket server.

use futures_util::{SinkExt, StreamExt};
use leadcall::config::LiveConfig;
use leadcall::live::{
    GeminiLiveConnector, LiveConnection, LiveConnector, OutboundMessage, RemoteEvent, SessionSetup,
};
use leadcall::{ErrorKind, VoiceError};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

type ServerWs = WebSocketStream<TcpStream>;

/// Accept one connection, record its request URI, and run `script` on it.
async fn live_server<F, Fut>(script: F) -> (String, Arc<Mutex<String>>, JoinHandle<()>)
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uri = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&uri);
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_hdr_async(
            stream,
            move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                *seen.lock().unwrap() = req.uri().to_string();
                Ok(resp)
            },
        )
        .await
        .unwrap();
        script(ws).await;
    });
    (format!("ws://{addr}/ws/live"), uri, handle)
}

async fn next_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Binary(bytes) => return serde_json::from_slice(&bytes).unwrap(),
            _ => {}
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

fn connector(url: &str, timeout: Duration) -> GeminiLiveConnector {
    GeminiLiveConnector::with_endpoint(url, Some("test-key".into()), timeout)
}

fn setup() -> SessionSetup {
    SessionSetup::from_config(&LiveConfig::default())
}

async fn recv(conn: &mut LiveConnection) -> RemoteEvent {
    tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .expect("remote event within 5s")
        .expect("transport still running")
}

#[tokio::test]
async fn session_round_trip() {
    let (url, uri, server) = live_server(|mut ws| async move {
        let setup = next_json(&mut ws).await;
        let setup = &setup["setup"];
        assert!(setup["model"].as_str().unwrap().starts_with("models/"));
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            setup["tools"][0]["functionDeclarations"][0]["name"],
            "bookDemoMeeting"
        );
        assert_eq!(setup["inputAudioTranscription"], json!({}));

        send_json(&mut ws, json!({ "setupComplete": {} })).await;
        send_json(
            &mut ws,
            json!({
                "serverContent": {
                    "inputTranscription": { "text": "I want a demo" },
                    "modelTurn": { "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }
                    ] },
                    "turnComplete": true
                }
            }),
        )
        .await;

        let outbound = next_json(&mut ws).await;
        assert_eq!(outbound, json!({ "realtimeInput": { "text": "hello" } }));

        let outbound = next_json(&mut ws).await;
        let confirmed = json!({ "result": "confirmed" });
        assert_eq!(
            outbound["toolResponse"]["functionResponses"][0],
            json!({ "id": "fc-1", "name": "bookDemoMeeting", "response": confirmed })
        );

        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "session expired".into(),
        }))
        .await
        .unwrap();
    })
    .await;

    let mut conn = connector(&url, Duration::from_secs(5))
        .connect(&setup())
        .await
        .unwrap();
    assert!(uri.lock().unwrap().contains("key=test-key"));

    assert_eq!(
        recv(&mut conn).await,
        RemoteEvent::Transcript {
            text: "I want a demo".into()
        }
    );
    match recv(&mut conn).await {
        RemoteEvent::Audio(chunk) => {
            assert_eq!(chunk.mime_type, "audio/pcm;rate=24000");
            assert_eq!(chunk.data, "AAAA");
        }
        other => panic!("expected audio, got {other:?}"),
    }
    assert_eq!(recv(&mut conn).await, RemoteEvent::TurnComplete);

    assert!(conn.send(OutboundMessage::Text("hello".into())));
    assert!(conn.send(OutboundMessage::ToolResponse {
        id: "fc-1".into(),
        name: "bookDemoMeeting".into(),
        response: json!({ "result": "confirmed" }),
    }));

    assert_eq!(
        recv(&mut conn).await,
        RemoteEvent::Error {
            message: "session expired".into()
        }
    );
    assert_eq!(
        recv(&mut conn).await,
        RemoteEvent::Closed {
            reason: Some("session expired".into())
        }
    );
    assert!(conn.is_closed());
    server.await.unwrap();
}

#[tokio::test]
async fn unacknowledged_setup_times_out() {
    let (url, _uri, server) = live_server(|mut ws| async move {
        let _ = next_json(&mut ws).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let err = connector(&url, Duration::from_millis(300))
        .connect(&setup())
        .await
        .unwrap_err();

    assert!(matches!(err, VoiceError::ConnectionFailed(_)));
    server.abort();
}

#[tokio::test]
async fn rejected_key_during_setup_needs_authorization() {
    let (url, _uri, server) = live_server(|mut ws| async move {
        let _ = next_json(&mut ws).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "API key not valid. Please pass a valid API key.".into(),
        }))
        .await
        .unwrap();
    })
    .await;

    let err = connector(&url, Duration::from_secs(5))
        .connect(&setup())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::AuthorizationRequired));
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connection_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = connector(&format!("ws://{addr}/ws/live"), Duration::from_secs(5))
        .connect(&setup())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ConnectionFailed));
}

#[tokio::test]
async fn local_close_sends_a_close_frame() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let (url, _uri, server) = live_server(|mut ws| async move {
        let _ = next_json(&mut ws).await;
        send_json(&mut ws, json!({ "setupComplete": {} })).await;
        let closed = matches!(ws.next().await, Some(Ok(Message::Close(_))) | None);
        let _ = tx.send(closed);
    })
    .await;

    let conn = connector(&url, Duration::from_secs(5))
        .connect(&setup())
        .await
        .unwrap();
    conn.close();

    let closed = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(closed);
    server.await.unwrap();
}
