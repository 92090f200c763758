//! Session state machine tests against the in-memory transport.

mod common;

use common::{Harness, config, drain, settle};
use gemlive::transport::close_code;
use gemlive::{
    AudioFormat, FunctionCall, FunctionResponse, MediaChunk, RealtimeError, SessionEvent,
    SessionState, TurnSummary,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_connect_transitions_through_setup() {
    let mut h = Harness::new();
    let (server, setup) = h.open().await;

    assert_eq!(setup, json!({ "setup": { "model": "m1" } }));
    assert_eq!(server.url().query(), Some("key=test-key"));
    assert_eq!(h.session.state(), SessionState::Open);

    let events = drain(&mut h.events);
    assert_eq!(
        events,
        vec![
            SessionEvent::StateChanged(SessionState::Connecting),
            SessionEvent::StateChanged(SessionState::AwaitingSetupComplete),
            SessionEvent::StateChanged(SessionState::Open),
            SessionEvent::SetupComplete,
        ]
    );
}

#[tokio::test]
async fn test_send_before_setup_complete_fails() {
    let mut h = Harness::new();
    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.connect(config()).await });

    let mut server = h.accept.recv().await.unwrap();
    server.recv_json().await.unwrap();
    assert_eq!(h.session.state(), SessionState::AwaitingSetupComplete);

    let err = h.session.send_text("too early").unwrap_err();
    assert!(matches!(err, RealtimeError::NotOpen { state: SessionState::AwaitingSetupComplete }));
    let err = h.session.send_realtime_input(vec![]).unwrap_err();
    assert!(matches!(err, RealtimeError::NotOpen { .. }));

    server.send_json(&json!({ "setupComplete": {} }));
    pending.await.unwrap().unwrap();
    assert!(h.session.is_open());
}

#[tokio::test]
async fn test_text_then_turn_complete() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "text": "Hello" }] } }
    }));
    server.send_json(&json!({ "serverContent": { "turnComplete": true } }));

    assert_eq!(h.next().await, SessionEvent::Text("Hello".to_string()));
    assert_eq!(
        h.next().await,
        SessionEvent::TurnComplete(TurnSummary { text: "Hello".to_string(), ..Default::default() })
    );
}

#[tokio::test]
async fn test_audio_part_emits_audio_before_text() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [
            { "text": "hi", "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEC" } },
            { "inlineData": { "mimeType": "audio/pcm", "data": "AwQ=" } }
        ] } }
    }));
    server.send_json(&json!({ "serverContent": { "turnComplete": true } }));

    let SessionEvent::Audio(first) = h.next().await else { panic!("expected audio") };
    assert_eq!(first.data.to_vec(), vec![0, 1, 2]);
    assert_eq!(first.format, AudioFormat::pcm16_24khz());
    assert_eq!(h.next().await, SessionEvent::Text("hi".to_string()));

    let SessionEvent::Audio(second) = h.next().await else { panic!("expected audio") };
    assert_eq!(second.data.to_vec(), vec![3, 4]);

    assert_eq!(
        h.next().await,
        SessionEvent::TurnComplete(TurnSummary {
            text: "hi".to_string(),
            audio_chunks: 2,
            audio_bytes: 5
        })
    );
}

#[tokio::test]
async fn test_interrupted_resets_turn() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "text": "stale" }] } }
    }));
    server.send_json(&json!({ "serverContent": { "interrupted": true } }));
    server.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "text": "fresh" }] } }
    }));
    server.send_json(&json!({ "serverContent": { "turnComplete": true } }));

    assert_eq!(h.next().await, SessionEvent::Text("stale".to_string()));
    assert_eq!(h.next().await, SessionEvent::Interrupted);
    assert_eq!(h.next().await, SessionEvent::Text("fresh".to_string()));
    let SessionEvent::TurnComplete(summary) = h.next().await else {
        panic!("expected turn complete");
    };
    assert_eq!(summary.text, "fresh");
}

#[tokio::test]
async fn test_tool_call_is_reported_not_executed() {
    let mut h = Harness::new();
    let (mut server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_json(&json!({
        "toolCall": { "functionCalls": [{ "id": "1", "name": "foo", "args": {} }] }
    }));

    assert_eq!(
        h.next().await,
        SessionEvent::ToolCall(vec![FunctionCall {
            id: "1".to_string(),
            name: "foo".to_string(),
            args: json!({}),
        }])
    );
    let nothing = tokio::time::timeout(Duration::from_millis(50), server.recv()).await;
    assert!(nothing.is_err(), "session must not answer tool calls itself");
}

#[tokio::test]
async fn test_tool_response_keeps_call_id() {
    let mut h = Harness::new();
    let (mut server, _) = h.open().await;

    h.session
        .send_tool_response(vec![
            FunctionResponse::new("b", json!({ "ok": true })),
            FunctionResponse::new("a", json!({ "ok": false })),
        ])
        .unwrap();

    assert_eq!(
        server.recv_json().await.unwrap(),
        json!({ "toolResponse": { "functionResponses": [
            { "id": "b", "response": { "ok": true } },
            { "id": "a", "response": { "ok": false } }
        ] } })
    );
}

#[tokio::test]
async fn test_outgoing_frames_in_call_order() {
    let mut h = Harness::new();
    let (mut server, _) = h.open().await;

    let chunk = MediaChunk::new("audio/pcm;rate=16000", vec![1, 2]);
    h.session.send_realtime_input(vec![chunk]).unwrap();
    h.session.send_text("hello").unwrap();

    assert_eq!(
        server.recv_json().await.unwrap(),
        json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AQI=" }]
            }
        })
    );
    assert_eq!(
        server.recv_json().await.unwrap(),
        json!({ "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": "hello" }] }],
            "turnComplete": true
        } })
    );
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_text("{not json");
    server.send_json(&json!({ "unknownFrame": {} }));
    server.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "text": "still here" }] } }
    }));

    assert_eq!(h.next().await, SessionEvent::Text("still here".to_string()));
    assert!(h.session.is_open());
}

#[tokio::test]
async fn test_binary_frames_are_decoded() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.send_binary(br#"{"goAway":{"timeLeft":"5s"}}"#.to_vec());
    assert_eq!(h.next().await, SessionEvent::GoAway(Some("5s".to_string())));
}

#[tokio::test]
async fn test_server_close_terminates_session() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    server.close(close_code::INTERNAL_ERROR, "ERROR] Deadline expired");

    let SessionEvent::Close(close) = h.next().await else { panic!("expected close") };
    assert_eq!(close.code, 1011);
    assert_eq!(close.reason, "ERROR] Deadline expired");
    assert!(!close.requested);
    assert!(close.established);
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(matches!(
        h.session.send_text("anyone?"),
        Err(RealtimeError::NotOpen { state: SessionState::Disconnected })
    ));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mut h = Harness::new();
    let (server, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    h.session.disconnect();
    h.session.disconnect();

    let SessionEvent::Close(close) = h.next().await else { panic!("expected close") };
    assert!(close.requested);
    assert!(close.established);
    assert!(close.is_normal());

    settle().await;
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(server.client_close().map(|c| c.code), Some(1000));
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_connect() {
    let mut h = Harness::new();
    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.connect(config()).await });

    let mut server = h.accept.recv().await.unwrap();
    server.recv_json().await.unwrap();
    h.session.disconnect();

    assert!(matches!(pending.await.unwrap(), Err(RealtimeError::Cancelled)));
    // A late setupComplete on the abandoned connection changes nothing.
    server.send_json(&json!({ "setupComplete": {} }));
    settle().await;
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_setup_complete() {
    let mut h = Harness::new();
    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.connect(config()).await });

    let mut server = h.accept.recv().await.unwrap();
    server.recv_json().await.unwrap();

    assert!(matches!(pending.await.unwrap(), Err(RealtimeError::Timeout(_))));
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_connect_failure_rejects() {
    let h = Harness::new();
    h.transport.refuse_next("handshake rejected");

    let err = h.session.connect(config()).await.unwrap_err();
    assert!(matches!(err, RealtimeError::ConnectionFailure(_)));
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_close_during_setup_rejects_connect() {
    let mut h = Harness::new();
    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.connect(config()).await });

    let mut server = h.accept.recv().await.unwrap();
    server.recv_json().await.unwrap();
    server.close(close_code::INVALID_PAYLOAD, "bad model");

    assert!(matches!(pending.await.unwrap(), Err(RealtimeError::ConnectionFailure(_))));
    let SessionEvent::Close(close) = h.next().await else { panic!("expected close") };
    assert!(!close.established);
}

#[tokio::test]
async fn test_connect_replaces_live_connection() {
    let mut h = Harness::new();
    let (first, _) = h.open().await;
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    let (second, _) = h.open().await;
    assert!(first.is_closed());
    assert_eq!(first.client_close().map(|c| c.code), Some(1000));

    let SessionEvent::Close(close) = h.next().await else { panic!("expected close of first") };
    assert!(close.requested);
    assert_eq!(h.next().await, SessionEvent::SetupComplete);

    second.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "text": "second" }] } }
    }));
    assert_eq!(h.next().await, SessionEvent::Text("second".to_string()));
    assert_eq!(h.transport.connect_count(), 2);
}
