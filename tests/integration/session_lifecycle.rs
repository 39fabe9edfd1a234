//! Session manager lifecycle against in-memory collaborators.

use crate::helpers::{
    FakeConnector, FakeInput, FakeOutput, Harness, RecordingNotifier, complete_booking_args,
    drain_events,
};
use leadcall::audio::pcm::encode_media;
use leadcall::live::{FunctionCall, OutboundMessage, RemoteEvent};
use leadcall::persona::{BOOKING_TOOL_NAME, OPENING_PROMPT};
use leadcall::session::SessionInput;
use leadcall::{AssistantConfig, ErrorKind, SessionManager, SessionState, VoiceError, WidgetEvent};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

fn booking_call(id: &str, args: serde_json::Value) -> RemoteEvent {
    RemoteEvent::ToolCall(FunctionCall {
        id: id.into(),
        name: BOOKING_TOOL_NAME.into(),
        args,
    })
}

fn chunk_ms(ms: u32) -> leadcall::audio::MediaChunk {
    let frames = (24_000 * ms / 1000) as usize;
    encode_media(&vec![0.1; frames], 24_000)
}

fn states(events: &[WidgetEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            WidgetEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

fn has_error(events: &[WidgetEvent], wanted: ErrorKind) -> bool {
    events
        .iter()
        .any(|e| matches!(e, WidgetEvent::Error { kind, .. } if *kind == wanted))
}

/// Wait for the next session input, handle it, and name what it was.
async fn step(manager: &mut SessionManager) -> &'static str {
    let input = tokio::time::timeout(Duration::from_secs(5), manager.next_input())
        .await
        .expect("session input within 5s");
    let kind = match &input {
        SessionInput::Remote(_) => "remote",
        SessionInput::Frame(_) => "frame",
        SessionInput::Connected(Ok(_)) => "connected",
        SessionInput::Connected(Err(_)) => "connect failed",
        SessionInput::Delivery(_) => "delivery",
    };
    manager.handle_input(input);
    kind
}

/// Handle inputs until the in-flight booking delivery has finished.
async fn settle_booking(manager: &mut SessionManager) {
    while manager.is_delivering() {
        step(manager).await;
    }
}

#[tokio::test]
async fn start_connects_once_and_speaks_first() {
    let h = Harness::new();
    let (mut manager, mut events) = h.manager(AssistantConfig::default());

    manager.start().await.unwrap();

    assert_eq!(manager.state(), SessionState::Active);
    assert!(manager.is_live());
    assert!(manager.session_id().is_some());
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.input.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(
        states(&drain_events(&mut events)),
        vec![SessionState::Connecting, SessionState::Active]
    );

    let setup = h.connector.last_setup.lock().unwrap().clone().unwrap();
    assert_eq!(setup.voice_name, "Kore");
    assert_eq!(setup.tools[0]["name"], BOOKING_TOOL_NAME);
    assert!(setup.input_transcription);

    let mut remote = h.connector.take_remote();
    assert_eq!(
        remote.drain(),
        vec![OutboundMessage::Text(OPENING_PROMPT.to_owned())]
    );
}

#[tokio::test]
async fn start_while_active_does_not_open_a_second_connection() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.start().await.unwrap();
    let err = manager.start().await.unwrap_err();

    assert!(matches!(err, VoiceError::SessionActive));
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(manager.state(), SessionState::Active);
}

#[tokio::test]
async fn start_while_connecting_is_rejected() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::slow(Duration::from_millis(50)),
        RecordingNotifier::default(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.begin_start().unwrap();
    assert_eq!(manager.state(), SessionState::Connecting);
    assert!(matches!(manager.begin_start(), Err(VoiceError::SessionActive)));
    assert!(matches!(manager.retry(), Err(VoiceError::SessionActive)));

    assert_eq!(step(&mut manager).await, "connected");
    assert_eq!(manager.state(), SessionState::Active);
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.input.acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn end_abandons_a_pending_connection() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::slow(Duration::from_secs(60)),
        RecordingNotifier::default(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.begin_start().unwrap();
    manager.end();

    assert_eq!(manager.state(), SessionState::Idle);
    assert!(!manager.is_live());
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.output.log.lock().unwrap().closed, 1);

    // Nothing left to wait for.
    let waited = tokio::time::timeout(Duration::from_millis(50), manager.next_input()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn permission_denied_never_connects() {
    let h = Harness::with(
        FakeInput::denying(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::default(),
    );
    let (mut manager, mut events) = h.manager(AssistantConfig::default());

    let err = manager.start().await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::PermissionDenied));
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::PermissionDenied)
    );
    assert!(!manager.is_live());
    assert!(has_error(&drain_events(&mut events), ErrorKind::PermissionDenied));
}

#[tokio::test]
async fn missing_speaker_releases_the_microphone() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::failing(),
        FakeConnector::default(),
        RecordingNotifier::default(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.start().await.unwrap_err();

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::AudioOutputUnavailable)
    );
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn rejected_key_needs_authorization_and_releases_devices() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::failing(|| VoiceError::AuthorizationRequired("API key not valid".into())),
        RecordingNotifier::default(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.start().await.unwrap_err();

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::AuthorizationRequired)
    );
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.output.log.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn retry_after_connection_failure_restarts() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::failing(|| VoiceError::ConnectionFailed("connection refused".into())),
        RecordingNotifier::default(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());

    manager.start().await.unwrap_err();
    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::ConnectionFailed)
    );

    manager.retry().unwrap();
    assert_eq!(manager.state(), SessionState::Connecting);
    assert_eq!(step(&mut manager).await, "connect failed");

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::ConnectionFailed)
    );
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.input.released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn incomplete_booking_never_reaches_the_notifier() {
    let h = Harness::new();
    let (mut manager, mut events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();
    drain_events(&mut events);

    let mut args = complete_booking_args();
    args["emailAddress"] = json!("");
    manager.handle_remote_event(booking_call("fc-1", args));

    assert!(!manager.is_delivering());
    assert_eq!(h.notifier.attempt_count(), 0);
    assert_eq!(manager.state(), SessionState::Active);
    assert!(manager.is_live());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        WidgetEvent::BookingRejected { missing } if missing == &vec!["emailAddress".to_owned()]
    )));

    match remote.drain().as_slice() {
        [OutboundMessage::ToolResponse { id, response, .. }] => {
            assert_eq!(id, "fc-1");
            assert_eq!(response["result"], "incomplete");
            assert_eq!(response["missing"], json!(["emailAddress"]));
        }
        other => panic!("unexpected outbound messages: {other:?}"),
    }
}

#[tokio::test]
async fn valid_booking_is_delivered_once_and_confirmed() {
    let h = Harness::new();
    let (mut manager, mut events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();
    drain_events(&mut events);

    manager.handle_remote_event(booking_call("fc-2", complete_booking_args()));
    assert_eq!(manager.state(), SessionState::AwaitingBooking);
    assert!(remote.drain().is_empty());

    settle_booking(&mut manager).await;

    assert_eq!(h.notifier.attempt_count(), 1);
    let delivered = h.notifier.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].full_name, "Ravi Kumar");
    assert_eq!(delivered[0].mobile_number, "9876543210");
    assert_eq!(delivered[0].email_address, "ravi@example.com");
    assert_eq!(delivered[0].preferred_time, "Tomorrow 11 AM");

    assert_eq!(manager.state(), SessionState::Success);
    assert_eq!(
        states(&drain_events(&mut events)),
        vec![SessionState::AwaitingBooking, SessionState::Success]
    );
    assert_eq!(
        remote.drain(),
        vec![OutboundMessage::ToolResponse {
            id: "fc-2".into(),
            name: BOOKING_TOOL_NAME.into(),
            response: json!({"result": "confirmed"}),
        }]
    );
}

#[tokio::test]
async fn failed_delivery_keeps_the_call_and_retry_books() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::failing_once(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();

    manager.handle_remote_event(booking_call("fc-3", complete_booking_args()));
    settle_booking(&mut manager).await;

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::NotificationDeliveryFailed)
    );
    assert!(manager.is_live());
    assert!(manager.has_pending_booking());
    match remote.drain().as_slice() {
        [OutboundMessage::ToolResponse { response, .. }] => {
            assert_eq!(response["result"], "failed");
        }
        other => panic!("unexpected outbound messages: {other:?}"),
    }

    manager.retry().unwrap();
    assert_eq!(manager.state(), SessionState::AwaitingBooking);
    settle_booking(&mut manager).await;

    assert_eq!(manager.state(), SessionState::Success);
    assert_eq!(h.notifier.attempt_count(), 2);
    assert_eq!(h.notifier.delivered_count(), 1);
    assert!(!manager.has_pending_booking());
    assert_eq!(h.connector.connect_count(), 1);
    assert!(matches!(remote.drain().as_slice(), [OutboundMessage::Text(_)]));
}

#[tokio::test]
async fn cancelled_call_after_failure_resumes_the_conversation() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::failing_once(),
    );
    let (mut manager, mut events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();

    manager.handle_remote_event(booking_call("fc-4", complete_booking_args()));
    settle_booking(&mut manager).await;
    assert!(manager.has_pending_booking());
    drain_events(&mut events);

    manager.handle_remote_event(RemoteEvent::ToolCallCancelled {
        ids: vec!["fc-4".into()],
    });

    assert!(!manager.has_pending_booking());
    assert_eq!(manager.state(), SessionState::Active);
    assert!(manager.is_live());
    assert_eq!(
        states(&drain_events(&mut events)),
        vec![SessionState::Active]
    );

    // A retry never tears down the live call.
    assert!(matches!(manager.retry(), Err(VoiceError::SessionActive)));
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.input.released.load(Ordering::SeqCst), 0);
    assert!(manager.is_live());
}

#[tokio::test]
async fn cancelled_call_during_delivery_abandons_it() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::slow(Duration::from_secs(60)),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();

    manager.handle_remote_event(booking_call("fc-7", complete_booking_args()));
    assert!(manager.is_delivering());

    manager.handle_remote_event(RemoteEvent::ToolCallCancelled {
        ids: vec!["fc-7".into()],
    });

    assert!(!manager.is_delivering());
    assert!(!manager.has_pending_booking());
    assert_eq!(manager.state(), SessionState::Active);
    assert!(remote.drain().is_empty());
    assert_eq!(h.notifier.delivered_count(), 0);
}

#[tokio::test]
async fn cancelling_another_call_leaves_the_booking_alone() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::failing_once(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    manager.handle_remote_event(booking_call("fc-8", complete_booking_args()));
    settle_booking(&mut manager).await;

    manager.handle_remote_event(RemoteEvent::ToolCallCancelled {
        ids: vec!["fc-other".into()],
    });

    assert!(manager.has_pending_booking());
    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::NotificationDeliveryFailed)
    );
}

#[tokio::test]
async fn second_booking_while_delivering_is_busy() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::slow(Duration::from_millis(50)),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();

    manager.handle_remote_event(booking_call("fc-9", complete_booking_args()));
    manager.handle_remote_event(booking_call("fc-10", complete_booking_args()));

    match remote.drain().as_slice() {
        [OutboundMessage::ToolResponse { id, response, .. }] => {
            assert_eq!(id, "fc-10");
            assert_eq!(response["result"], "busy");
        }
        other => panic!("unexpected outbound messages: {other:?}"),
    }

    settle_booking(&mut manager).await;
    assert_eq!(manager.state(), SessionState::Success);
    assert_eq!(h.notifier.delivered_count(), 1);
}

#[tokio::test]
async fn unknown_tool_gets_an_error_response() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();

    manager.handle_remote_event(RemoteEvent::ToolCall(FunctionCall {
        id: "fc-5".into(),
        name: "sendBrochure".into(),
        args: json!({}),
    }));

    assert_eq!(h.notifier.attempt_count(), 0);
    assert_eq!(manager.state(), SessionState::Active);
    match remote.drain().as_slice() {
        [OutboundMessage::ToolResponse { name, response, .. }] => {
            assert_eq!(name, "sendBrochure");
            assert!(response["error"].as_str().unwrap().contains("unknown tool"));
        }
        other => panic!("unexpected outbound messages: {other:?}"),
    }
}

#[tokio::test]
async fn bursty_audio_plays_back_to_back() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();

    for (i, now) in [0.0, 0.05, 0.10].into_iter().enumerate() {
        h.output.set_now(now);
        manager.handle_remote_event(RemoteEvent::Audio(chunk_ms(200)));
        assert_eq!(h.output.log.lock().unwrap().started.len(), i + 1);
    }

    let started = h.output.log.lock().unwrap().started.clone();
    for pair in started.windows(2) {
        let (_, prev_start, prev_len) = pair[0];
        let (_, next_start, _) = pair[1];
        assert!((next_start - (prev_start + prev_len)).abs() < 1e-9);
    }
    let (_, first, _) = started[0];
    let (_, last, last_len) = started[2];
    assert!((last + last_len - first - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn interruption_stops_playback_and_resets_the_clock() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();

    for _ in 0..3 {
        manager.handle_remote_event(RemoteEvent::Audio(chunk_ms(200)));
    }
    h.output.set_now(0.3);
    manager.handle_remote_event(RemoteEvent::Interrupted);
    assert_eq!(h.output.log.lock().unwrap().stopped.len(), 3);

    manager.handle_remote_event(RemoteEvent::Audio(chunk_ms(200)));
    let (_, start, _) = *h.output.log.lock().unwrap().started.last().unwrap();
    assert!((start - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn transcript_accumulates_in_order() {
    let h = Harness::new();
    let (mut manager, mut events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    drain_events(&mut events);

    for text in ["Mera naam", "  Ravi hai ", ""] {
        manager.handle_remote_event(RemoteEvent::Transcript { text: text.into() });
    }

    assert_eq!(manager.transcript(), "Mera naam Ravi hai");
    let transcripts: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, WidgetEvent::Transcript { .. }))
        .collect();
    assert_eq!(transcripts.len(), 2);
}

#[tokio::test]
async fn captured_frames_are_sent_as_pcm() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let mut remote = h.connector.take_remote();
    remote.drain();

    h.input.capture(vec![0.0; 4096]);
    let input = manager.next_input().await;
    assert!(matches!(input, SessionInput::Frame(_)));
    manager.handle_input(input);

    match remote.drain().as_slice() {
        [OutboundMessage::Audio(chunk)] => {
            assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
            assert!(!chunk.data.is_empty());
        }
        other => panic!("unexpected outbound messages: {other:?}"),
    }
}

#[tokio::test]
async fn remote_events_arrive_through_next_input() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let remote = h.connector.take_remote();

    remote
        .events
        .send(RemoteEvent::Transcript { text: "hello".into() })
        .await
        .unwrap();
    let input = manager.next_input().await;
    manager.handle_input(input);
    assert_eq!(manager.transcript(), "hello");

    // Transport gone without a close frame.
    drop(remote);
    let input = manager.next_input().await;
    assert!(matches!(
        input,
        SessionInput::Remote(RemoteEvent::Closed { reason: None })
    ));
    manager.handle_input(input);
    assert_eq!(manager.state(), SessionState::Idle);
    assert!(!manager.is_live());
}

#[tokio::test]
async fn end_is_idempotent_and_releases_everything() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    let remote = h.connector.take_remote();

    manager.end();
    manager.end();

    assert_eq!(manager.state(), SessionState::Idle);
    assert!(!manager.is_live());
    assert!(manager.transcript().is_empty());
    assert!(manager.inactivity_deadline().is_none());
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.output.log.lock().unwrap().closed, 1);
    assert!(remote.cancel.is_cancelled());
}

#[tokio::test]
async fn end_during_delivery_abandons_it() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::slow(Duration::from_secs(60)),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    manager.handle_remote_event(booking_call("fc-11", complete_booking_args()));

    manager.end();

    assert!(!manager.is_delivering());
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.delivered_count(), 0);
}

#[tokio::test]
async fn remote_error_tears_down_and_end_is_still_safe() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();

    manager.handle_remote_event(RemoteEvent::Error {
        message: "Requested entity was not found.".into(),
    });

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::AuthorizationRequired)
    );
    assert!(!manager.is_live());
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);

    manager.end();
    manager.end();
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(h.input.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn network_error_is_connection_lost() {
    let h = Harness::new();
    let (mut manager, mut events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    drain_events(&mut events);

    manager.handle_remote_event(RemoteEvent::Error {
        message: "read error: connection reset".into(),
    });

    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::ConnectionLost)
    );
    let message = drain_events(&mut events)
        .into_iter()
        .find_map(|e| match e {
            WidgetEvent::Error { message, .. } => Some(message),
            _ => None,
        })
        .unwrap();
    assert_eq!(message, "connection lost: read error: connection reset");
}

#[tokio::test]
async fn remote_error_forgets_a_failed_booking() {
    let h = Harness::with(
        FakeInput::default(),
        FakeOutput::default(),
        FakeConnector::default(),
        RecordingNotifier::failing_once(),
    );
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    manager.handle_remote_event(booking_call("fc-12", complete_booking_args()));
    settle_booking(&mut manager).await;
    assert!(manager.has_pending_booking());

    manager.handle_remote_event(RemoteEvent::Error {
        message: "read error: connection reset".into(),
    });

    assert!(!manager.has_pending_booking());
    assert_eq!(
        manager.state(),
        SessionState::Error(ErrorKind::ConnectionLost)
    );

    // With nothing to re-deliver, retry reconnects.
    manager.retry().unwrap();
    assert_eq!(step(&mut manager).await, "connected");
    assert_eq!(manager.state(), SessionState::Active);
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.notifier.attempt_count(), 1);
}

#[tokio::test]
async fn dismiss_returns_to_idle_from_success() {
    let h = Harness::new();
    let (mut manager, _events) = h.manager(AssistantConfig::default());
    manager.start().await.unwrap();
    manager.handle_remote_event(booking_call("fc-6", complete_booking_args()));
    settle_booking(&mut manager).await;
    assert_eq!(manager.state(), SessionState::Success);

    manager.dismiss();

    assert_eq!(manager.state(), SessionState::Idle);
    assert!(!manager.is_live());

    // Dismiss outside a result card does nothing.
    manager.start().await.unwrap();
    manager.dismiss();
    assert_eq!(manager.state(), SessionState::Active);
}

#[tokio::test]
async fn idle_session_times_out() {
    let h = Harness::new();
    let mut config = AssistantConfig::default();
    config.session.inactivity_timeout_secs = 5;
    let (mut manager, mut events) = h.manager(config);
    manager.start().await.unwrap();

    let deadline = manager.inactivity_deadline().unwrap();
    assert!(!manager.check_inactivity(deadline - Duration::from_secs(1)));
    assert!(manager.is_live());

    assert!(manager.check_inactivity(Instant::now() + Duration::from_secs(6)));
    assert_eq!(manager.state(), SessionState::Idle);
    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, WidgetEvent::TimedOut)));
}

#[tokio::test(start_paused = true)]
async fn agent_activity_pushes_the_deadline_back() {
    let h = Harness::new();
    let mut config = AssistantConfig::default();
    config.session.inactivity_timeout_secs = 5;
    let (mut manager, _events) = h.manager(config);
    manager.start().await.unwrap();
    let started = manager.inactivity_deadline().unwrap();

    tokio::time::advance(Duration::from_secs(3)).await;
    manager.handle_remote_event(RemoteEvent::Transcript {
        text: "haan".into(),
    });
    assert_eq!(
        manager.inactivity_deadline().unwrap(),
        started + Duration::from_secs(3)
    );

    tokio::time::advance(Duration::from_secs(3)).await;
    manager.handle_remote_event(RemoteEvent::Audio(chunk_ms(20)));
    assert_eq!(
        manager.inactivity_deadline().unwrap(),
        started + Duration::from_secs(6)
    );

    tokio::time::advance(Duration::from_secs(3)).await;
    let mut args = complete_booking_args();
    args["fullName"] = json!("");
    manager.handle_remote_event(booking_call("fc-13", args));
    assert_eq!(
        manager.inactivity_deadline().unwrap(),
        started + Duration::from_secs(9)
    );

    // Nine seconds in, a five second timeout has not fired.
    assert!(!manager.check_inactivity(Instant::now()));
    assert!(manager.is_live());
}

#[tokio::test(start_paused = true)]
async fn visitor_audio_does_not_count_as_activity() {
    let h = Harness::new();
    let mut config = AssistantConfig::default();
    config.session.inactivity_timeout_secs = 5;
    let (mut manager, _events) = h.manager(config);
    manager.start().await.unwrap();
    let started = manager.inactivity_deadline().unwrap();

    tokio::time::advance(Duration::from_secs(3)).await;
    h.input.capture(vec![0.0; 1024]);
    assert_eq!(step(&mut manager).await, "frame");
    assert_eq!(manager.inactivity_deadline().unwrap(), started);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(manager.check_inactivity(Instant::now()));
    assert!(!manager.is_live());
}

#[tokio::test]
async fn zero_timeout_disables_inactivity() {
    let h = Harness::new();
    let mut config = AssistantConfig::default();
    config.session.inactivity_timeout_secs = 0;
    let (mut manager, _events) = h.manager(config);
    manager.start().await.unwrap();

    assert!(manager.inactivity_deadline().is_none());
    assert!(!manager.check_inactivity(Instant::now() + Duration::from_secs(3600)));
    assert!(manager.is_live());
}
