//! WebSocket transport over tokio-tungstenite.

use super::{CloseFrame, Connection, Link, Transport, TransportEvent, close_code};
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a locally initiated close waits for the peer's close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport that opens a WebSocket per connection.
#[derive(Debug, Clone)]
pub struct WsTransport {
    close_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self { close_timeout: CLOSE_HANDSHAKE_TIMEOUT }
    }
}

impl WsTransport {
    /// Create a new WebSocket transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long `close` waits for the peer's close frame.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        // The query carries the credential.
        info!(host = url.host_str().unwrap_or_default(), path = url.path(), "Opening WebSocket");

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::connection(format!("WebSocket connect error: {e}")))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(LinkState {
            open: AtomicBool::new(true),
            closing: CancellationToken::new(),
            local_close: Mutex::new(None),
        });

        tokio::spawn(write_loop(sink, write_rx, shared.clone()));
        tokio::spawn(read_loop(source, event_tx, shared.clone(), self.close_timeout));

        Ok(Connection { link: Arc::new(WsLink { write_tx, state: shared }), events: event_rx })
    }
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

struct LinkState {
    open: AtomicBool,
    closing: CancellationToken,
    local_close: Mutex<Option<CloseFrame>>,
}

struct WsLink {
    write_tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<LinkState>,
}

impl Link for WsLink {
    fn send(&self, message: String) -> Result<()> {
        if !self.state.open.load(Ordering::Acquire) {
            return Err(RealtimeError::SessionClosed);
        }
        self.write_tx.send(Outbound::Text(message)).map_err(|_| RealtimeError::SessionClosed)
    }

    fn close(&self, code: u16, reason: &str) {
        if !self.state.open.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(code, reason, "Closing WebSocket");
        *self.state.local_close.lock() = Some(CloseFrame::new(code, reason));
        let _ = self.write_tx.send(Outbound::Close(code, reason.to_string()));
        self.state.closing.cancel();
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<LinkState>,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
            _ = state.closing.cancelled() => {
                // Reader finished; flush any pending close reply and drop the socket.
                let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, sink.close()).await;
                break;
            }
        };
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "WebSocket write failed");
                    state.open.store(false, Ordering::Release);
                    break;
                }
            }
            Outbound::Close(code, reason) => {
                let frame = WsCloseFrame { code: CloseCode::from(code), reason: reason.into() };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                break;
            }
        }
    }
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<LinkState>,
    close_timeout: Duration,
) {
    let frame = loop {
        tokio::select! {
            biased;
            _ = state.closing.cancelled() => {
                break await_close_echo(&mut source, &state, close_timeout).await;
            }
            next = source.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    let data = Bytes::copy_from_slice(text.as_bytes());
                    let _ = events.send(TransportEvent::Message(data));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message(data));
                }
                Some(Ok(Message::Close(close))) => break peer_close(close),
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseFrame::abnormal(e.to_string()),
                None => break CloseFrame::abnormal("connection dropped"),
            },
        }
    };

    state.open.store(false, Ordering::Release);
    state.closing.cancel();
    info!(code = frame.code, reason = %frame.reason, clean = frame.was_clean, "WebSocket closed");
    let _ = events.send(TransportEvent::Closed(frame));
}

/// After a local close, drain until the peer echoes the close frame or the
/// timeout elapses. Inbound data at this point is discarded.
async fn await_close_echo(
    source: &mut SplitStream<WsStream>,
    state: &LinkState,
    close_timeout: Duration,
) -> CloseFrame {
    let local = state
        .local_close
        .lock()
        .take()
        .unwrap_or_else(|| CloseFrame::new(close_code::NORMAL, ""));

    let echo = tokio::time::timeout(close_timeout, async {
        while let Some(next) = source.next().await {
            match next {
                Ok(Message::Close(_)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    CloseFrame { was_clean: echo, ..local }
}

fn peer_close(close: Option<WsCloseFrame>) -> CloseFrame {
    match close {
        Some(frame) => CloseFrame::new(u16::from(frame.code), frame.reason.as_str()),
        None => CloseFrame::new(close_code::NO_STATUS, ""),
    }
}
