//! Error types for live sessions.

use crate::session::SessionState;
use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while talking to a live endpoint.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The transport could not be opened (DNS, TLS, handshake rejection).
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    /// An inbound frame could not be decoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame was sent while the session was not open.
    #[error("Session not open (state: {state})")]
    NotOpen {
        /// State the session was in when the send was attempted.
        state: SessionState,
    },

    /// The underlying connection is already closed.
    #[error("Connection already closed")]
    SessionClosed,

    /// The transport closed with a non-normal close code.
    #[error("Connection closed abnormally: {code} {reason}")]
    AbnormalClosure {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },

    /// The single automatic reconnection did not recover the session.
    #[error("Reconnection failed after close {code}: {reason}")]
    ReconnectExhausted {
        /// Close code of the closure that exhausted the retry budget.
        code: u16,
        /// Reason text of that closure.
        reason: String,
    },

    /// Timeout waiting for the endpoint.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A pending connect was abandoned by `disconnect()`.
    #[error("Connect cancelled by disconnect")]
    Cancelled,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Tool dispatch error.
    #[error("Tool error: {0}")]
    ToolError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionFailure(msg.into())
    }

    /// Create a new malformed-frame error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }

    /// Whether the error ends the session (as opposed to a dropped frame or a
    /// rejected send).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::AbnormalClosure { .. })
    }

    /// A sentence suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionFailure(_) => {
                "Could not connect to the live service. Check your network and API key.".to_string()
            }
            Self::AbnormalClosure { reason, .. } => match error_text(reason) {
                Some(text) => format!("The live session ended unexpectedly: {text}"),
                None => "The live session ended unexpectedly.".to_string(),
            },
            Self::ReconnectExhausted { reason, .. } => match error_text(reason) {
                Some(text) => format!("The live session was lost and could not be resumed: {text}"),
                None => "The live session was lost and could not be resumed. Please reconnect."
                    .to_string(),
            },
            Self::Timeout(_) => "The live service did not respond in time.".to_string(),
            Self::NotOpen { .. } => "The live session is not connected.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Extracts the human-readable part of a close reason.
///
/// The endpoint formats failures as `... ERROR] <message>`; the text after the
/// last marker is returned. Reasons without the marker are returned trimmed, and
/// empty reasons yield `None`.
pub fn error_text(reason: &str) -> Option<&str> {
    let text = match reason.rfind("ERROR]") {
        Some(idx) => &reason[idx + "ERROR]".len()..],
        None => reason,
    };
    let text = text.trim();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_extracts_marker() {
        assert_eq!(
            error_text("[ORIGINAL ERROR] generic::deadline_exceeded: Deadline expired"),
            Some("generic::deadline_exceeded: Deadline expired")
        );
    }

    #[test]
    fn test_error_text_without_marker() {
        assert_eq!(error_text("  quota exceeded "), Some("quota exceeded"));
        assert_eq!(error_text(""), None);
        assert_eq!(error_text("ERROR]   "), None);
    }

    #[test]
    fn test_user_message_uses_reason() {
        let err = RealtimeError::ReconnectExhausted {
            code: 1011,
            reason: "ERROR] Internal error encountered.".to_string(),
        };
        assert_eq!(
            err.user_message(),
            "The live session was lost and could not be resumed: Internal error encountered."
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_not_open_display() {
        let err = RealtimeError::NotOpen { state: SessionState::Connecting };
        assert_eq!(err.to_string(), "Session not open (state: connecting)");
        assert!(!err.is_fatal());
    }
}
