//! Capture and playback wired to a live session over the in-memory transport.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gemlive::transport::ServerEnd;
use gemlive::{LiveSession, MemoryTransport, SessionConfig};
use gemlive_audio::{CaptureProcessor, PlaybackQueue, drive_playback, forward_capture};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn open_session() -> (LiveSession, ServerEnd) {
    let (transport, mut accept) = MemoryTransport::new();
    let session = LiveSession::new(transport);
    let config =
        SessionConfig::builder("test-key").endpoint("ws://localhost/live").build().unwrap();

    let connecting = session.clone();
    let (result, server) = tokio::join!(connecting.connect(config), async move {
        let mut server = accept.recv().await.unwrap();
        server.recv_json().await.unwrap();
        server.send_json(&json!({ "setupComplete": {} }));
        server
    });
    result.unwrap();
    (session, server)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn model_audio(samples: &[i16]) -> serde_json::Value {
    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": STANDARD.encode(pcm)
                    }
                }]
            }
        }
    })
}

async fn recv_media(server: &mut ServerEnd) -> (String, Vec<u8>) {
    let frame = tokio::time::timeout(WAIT, server.recv_json()).await.unwrap().unwrap();
    let chunk = &frame["realtimeInput"]["mediaChunks"][0];
    let data = STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
    (chunk["mimeType"].as_str().unwrap().to_string(), data)
}

#[tokio::test]
async fn test_captured_audio_reaches_endpoint() {
    let (session, mut server) = open_session().await;
    let (processor, control, chunks) = CaptureProcessor::new(16_000, 1).unwrap();
    tokio::spawn(forward_capture(session.clone(), chunks));

    control.start();
    processor.push_i16(&[256; 1600]);

    let (mime, data) = recv_media(&mut server).await;
    assert_eq!(mime, "audio/pcm;rate=16000");
    assert_eq!(data.len(), 3200);
    assert_eq!(&data[..2], &256i16.to_le_bytes());

    processor.push_i16(&[0; 400]);
    control.stop();
    let (_, tail) = recv_media(&mut server).await;
    assert_eq!(tail.len(), 800);
}

#[tokio::test]
async fn test_capture_dropped_while_session_closed() {
    let (session, mut server) = open_session().await;
    let (processor, control, chunks) = CaptureProcessor::new(16_000, 1).unwrap();
    let forwarder = tokio::spawn(forward_capture(session.clone(), chunks));

    session.disconnect();
    control.start();
    processor.push_i16(&[1; 1600]);
    drop(processor);
    drop(control);

    tokio::time::timeout(WAIT, forwarder).await.unwrap().unwrap();
    assert!(server.recv().await.is_none());
}

#[tokio::test]
async fn test_interrupt_clears_queued_playback() {
    let (session, server) = open_session().await;
    let queue = PlaybackQueue::new(24_000, 1).unwrap();
    tokio::spawn(drive_playback(session.subscribe(), queue.clone()));

    server.send_json(&model_audio(&[8192; 480]));
    server.send_json(&model_audio(&[8192; 480]));
    wait_until(|| queue.queued_samples() == 960).await;

    let mut out = [0.0f32; 240];
    queue.fill(&mut out);
    assert!(out.iter().all(|s| *s == 0.25));

    server.send_json(&json!({ "serverContent": { "interrupted": true } }));
    wait_until(|| queue.is_idle()).await;

    queue.fill(&mut out);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(queue.meter().level(), 0.0);
}

#[tokio::test]
async fn test_connection_loss_clears_playback() {
    let (session, server) = open_session().await;
    let queue = PlaybackQueue::new(24_000, 1).unwrap();
    tokio::spawn(drive_playback(session.subscribe(), queue.clone()));

    server.send_json(&model_audio(&[100; 480]));
    wait_until(|| queue.queued_samples() == 480).await;

    server.close(1011, "deadline exceeded");
    wait_until(|| queue.is_idle()).await;
}
