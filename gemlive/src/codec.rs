//! Stateless conversion between frames and wire messages.

use crate::error::{RealtimeError, Result};
use crate::frame::{FunctionCall, IncomingFrame, OutgoingFrame, Part, ServerContent};
use serde::Deserialize;
use serde::de::IgnoredAny;

/// Serialize an outgoing frame into a JSON text message.
pub fn encode(frame: &OutgoingFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode one inbound message.
///
/// The endpoint sends JSON either as text or inside binary messages; both are
/// accepted. Sibling keys the client does not consume (`usageMetadata`, ...)
/// are ignored.
pub fn decode(message: &[u8]) -> Result<IncomingFrame> {
    let raw: RawServerMessage = serde_json::from_slice(message)
        .map_err(|e| RealtimeError::protocol(format!("{e}: {}", preview(message))))?;

    if raw.setup_complete.is_some() {
        return Ok(IncomingFrame::SetupComplete);
    }

    if let Some(content) = raw.server_content {
        let mut signals = Vec::with_capacity(1);
        if let Some(turn) = content.model_turn {
            signals.push(ServerContent::ModelTurn(turn.parts));
        }
        if content.interrupted.unwrap_or(false) {
            signals.push(ServerContent::Interrupted);
        }
        if content.turn_complete.unwrap_or(false) {
            signals.push(ServerContent::TurnComplete);
        }
        if signals.is_empty() {
            return Err(RealtimeError::protocol(format!(
                "serverContent without modelTurn, turnComplete or interrupted: {}",
                preview(message)
            )));
        }
        return Ok(IncomingFrame::ServerContent(signals));
    }

    if let Some(call) = raw.tool_call {
        return Ok(IncomingFrame::ToolCall(call.function_calls));
    }

    if let Some(cancellation) = raw.tool_call_cancellation {
        return Ok(IncomingFrame::ToolCallCancellation(cancellation.ids));
    }

    if let Some(go_away) = raw.go_away {
        return Ok(IncomingFrame::GoAway { time_left: go_away.time_left });
    }

    Err(RealtimeError::protocol(format!("unrecognized frame: {}", preview(message))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<IgnoredAny>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    tool_call_cancellation: Option<RawToolCallCancellation>,
    go_away: Option<RawGoAway>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawModelTurn>,
    turn_complete: Option<bool>,
    interrupted: Option<bool>,
}

#[derive(Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize)]
struct RawToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    time_left: Option<String>,
}

fn preview(message: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(message);
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
