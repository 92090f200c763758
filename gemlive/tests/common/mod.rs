//! Shared helpers for session and reconnection tests.

#![allow(dead_code)]

use gemlive::transport::ServerEnd;
use gemlive::{LiveSession, MemoryTransport, SessionConfig, SessionEvent};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for waiting on a single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn config() -> SessionConfig {
    SessionConfig::builder("test-key")
        .endpoint("ws://localhost/live")
        .model("m1")
        .build()
        .expect("valid test config")
}

pub struct Harness {
    pub session: LiveSession,
    pub transport: Arc<MemoryTransport>,
    pub accept: UnboundedReceiver<ServerEnd>,
    pub events: UnboundedReceiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let (transport, accept) = MemoryTransport::new();
        let session = LiveSession::new(transport.clone());
        let events = session.subscribe();
        Self { session, transport, accept, events }
    }

    /// Connect and complete the handshake; returns the server end and the
    /// setup frame it received.
    pub async fn open(&mut self) -> (ServerEnd, Value) {
        let session = self.session.clone();
        let (result, handshake) =
            tokio::join!(session.connect(config()), accept_setup(&mut self.accept));
        result.expect("connect should succeed");
        handshake
    }

    /// Next event that is not a state change.
    pub async fn next(&mut self) -> SessionEvent {
        next_event(&mut self.events).await
    }
}

/// Accept the next connection, read its setup frame and reply `setupComplete`.
pub async fn accept_setup(accept: &mut UnboundedReceiver<ServerEnd>) -> (ServerEnd, Value) {
    let mut server = accept.recv().await.expect("connection expected");
    let setup = server.recv_json().await.expect("setup frame expected");
    server.send_json(&json!({ "setupComplete": {} }));
    (server, setup)
}

pub async fn next_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if !matches!(event, SessionEvent::StateChanged(_)) {
            return event;
        }
    }
}

/// Every event currently queued, including state changes.
pub fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Let spawned tasks run until they are idle.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
