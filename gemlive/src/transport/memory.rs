//! In-process transport with a scriptable server side.
//!
//! Every [`MemoryTransport::connect`] hands a [`ServerEnd`] to whoever holds
//! the accept receiver. The server end reads what the client sent and pushes
//! messages or a close back. Dropping a `ServerEnd` without closing it is seen
//! by the client as a dropped connection (code 1006).

use super::{CloseFrame, Connection, Link, Transport, TransportEvent};
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use url::Url;

/// Transport whose connections terminate in the same process.
#[derive(Debug)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    connects: AtomicUsize,
    refusals: Mutex<VecDeque<String>>,
}

impl MemoryTransport {
    /// Create a transport and the receiver of server ends, one per connect.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accept_tx,
            connects: AtomicUsize::new(0),
            refusals: Mutex::new(VecDeque::new()),
        });
        (transport, accept_rx)
    }

    /// Number of `connect` calls so far, including refused ones.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make the next `connect` fail with `ConnectionFailure`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.refusals.lock().pop_front() {
            return Err(RealtimeError::connection(reason));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, events) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            to_server: Mutex::new(Some(to_server)),
            to_client,
            closed: AtomicBool::new(false),
            client_close: Mutex::new(None),
        });

        let server = ServerEnd { url: url.clone(), shared: shared.clone(), from_client };
        if self.accept_tx.send(server).is_err() {
            return Err(RealtimeError::connection("no server accepting connections"));
        }

        Ok(Connection { link: Arc::new(MemoryLink(shared)), events })
    }
}

#[derive(Debug)]
struct Shared {
    to_server: Mutex<Option<mpsc::UnboundedSender<String>>>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
    client_close: Mutex<Option<CloseFrame>>,
}

impl Shared {
    fn finish(&self, frame: CloseFrame) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.to_server.lock().take();
        let _ = self.to_client.send(TransportEvent::Closed(frame));
        true
    }
}

struct MemoryLink(Arc<Shared>);

impl Link for MemoryLink {
    fn send(&self, message: String) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::SessionClosed);
        }
        match self.0.to_server.lock().as_ref() {
            Some(tx) => tx.send(message).map_err(|_| RealtimeError::SessionClosed),
            None => Err(RealtimeError::SessionClosed),
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame::new(code, reason);
        if self.0.finish(frame.clone()) {
            *self.0.client_close.lock() = Some(frame);
        }
    }

    fn is_open(&self) -> bool {
        !self.0.closed.load(Ordering::SeqCst)
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct ServerEnd {
    url: Url,
    shared: Arc<Shared>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    /// URL the client connected to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next message sent by the client, or `None` once the connection closed
    /// and every sent message was read.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next client message parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Push a text message to the client. Ignored after close.
    pub fn send_text(&self, text: impl Into<String>) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            let _ = self.shared.to_client.send(TransportEvent::Message(Bytes::from(text.into())));
        }
    }

    /// Push a JSON value to the client.
    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Push raw bytes to the client, as a binary WebSocket message would.
    pub fn send_binary(&self, data: impl Into<Bytes>) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            let _ = self.shared.to_client.send(TransportEvent::Message(data.into()));
        }
    }

    /// Close the connection from the server side with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        self.shared.finish(CloseFrame::new(code, reason));
    }

    /// Drop the connection without a close handshake (code 1006).
    pub fn abort(&self) {
        self.shared.finish(CloseFrame::abnormal("connection reset"));
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Close frame sent by the client, if the client closed first.
    pub fn client_close(&self) -> Option<CloseFrame> {
        self.shared.client_close.lock().clone()
    }
}

impl Drop for ServerEnd {
    fn drop(&mut self) {
        self.shared.finish(CloseFrame::abnormal("server went away"));
    }
}
