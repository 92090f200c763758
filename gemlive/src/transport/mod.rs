//! Duplex transports.
//!
//! A [`Transport`] opens one full-duplex connection to an endpoint. The
//! resulting [`Connection`] splits into a [`Link`] for sending and a receiver
//! of [`TransportEvent`]s. Every connection delivers exactly one
//! [`TransportEvent::Closed`], including for I/O errors, which are normalized
//! into close code [`close_code::ABNORMAL`].

mod memory;
mod ws;

pub use memory::{MemoryTransport, ServerEnd};
pub use ws::WsTransport;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// WebSocket close codes the client interprets.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// No close frame received (connection dropped, I/O error).
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload data; the endpoint also uses it for invalid arguments.
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Internal error; the endpoint uses it for deadline exceeded.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
    /// Whether a close handshake took place.
    pub was_clean: bool,
}

impl CloseFrame {
    /// A clean close with the given code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into(), was_clean: true }
    }

    /// An abnormal close caused by an I/O error.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self { code: close_code::ABNORMAL, reason: reason.into(), was_clean: false }
    }
}

/// Events delivered by a connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound message.
    Message(Bytes),
    /// The connection ended. Delivered exactly once, always last.
    Closed(CloseFrame),
}

/// Sending half of a connection.
pub trait Link: Send + Sync {
    /// Queue a text message. Fails with `SessionClosed` if the link is closed.
    fn send(&self, message: String) -> Result<()>;

    /// Close the connection. Safe to call repeatedly.
    fn close(&self, code: u16, reason: &str);

    /// Whether the link still accepts messages.
    fn is_open(&self) -> bool;
}

/// An open connection.
pub struct Connection {
    /// Sending half.
    pub link: Arc<dyn Link>,
    /// Inbound messages followed by exactly one `Closed`.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("open", &self.link.is_open()).finish()
    }
}

/// Opens connections to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. Resolves once the connection can send.
    async fn connect(&self, url: &Url) -> Result<Connection>;
}
