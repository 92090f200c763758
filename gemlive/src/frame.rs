//! Typed protocol frames.
//!
//! Outgoing frames serialize to the endpoint's JSON envelope directly
//! (`{"setup": {...}}`, `{"clientContent": {...}}`, ...). Incoming frames are
//! produced by [`crate::codec::decode`], which matches on the envelope shape.
//!
//! Inline media is carried as raw bytes and encoded as base64 on the wire.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Custom serde for base64-encoded media ───────────────────────────────

fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD.decode(&s).map_err(serde::de::Error::custom)
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = base64::engine::general_purpose::STANDARD.encode(bytes);
    serializer.serialize_str(&s)
}

// ── Shared content types ────────────────────────────────────────────────

/// Binary payload with its mime type (`inlineData` / `mediaChunks` entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Mime type, e.g. `audio/pcm;rate=16000` or `image/jpeg`.
    pub mime_type: String,
    /// Raw bytes (base64 on the wire).
    #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
    pub data: Vec<u8>,
}

/// A realtime media chunk (audio or video frame).
pub type MediaChunk = Blob;

impl Blob {
    /// Create a new blob.
    pub fn new(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    /// Whether the payload is audio.
    pub fn is_audio(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("audio/")
    }
}

/// One part of a content turn.
///
/// A part may carry text, inline data, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    /// A text-only part.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), inline_data: None }
    }

    /// An inline-data part.
    pub fn inline(blob: Blob) -> Self {
        Self { text: None, inline_data: Some(blob) }
    }
}

/// A role-tagged list of parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`; omitted for system instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Parts of this turn.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn with the given parts.
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: Some("user".to_string()), parts }
    }
}

// ── Setup ───────────────────────────────────────────────────────────────

/// Response modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    /// Text output.
    Text,
    /// Audio output.
    Audio,
}

/// Prebuilt voice selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, e.g. `Puck`.
    pub voice_name: String,
}

/// Voice configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Prebuilt voice.
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Speech configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice configuration.
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    /// Select a prebuilt voice by name.
    pub fn voice(name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: name.into() },
            },
        }
    }
}

/// Generation parameters sent in the setup frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Response modalities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<Modality>>,
    /// Voice selection for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Function declaration embedded in the setup frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Tool group in the setup frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Declared functions.
    pub function_declarations: Vec<ToolDefinition>,
}

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupFrame {
    /// Model resource name, e.g. `models/gemini-2.0-flash-exp`.
    pub model: String,
    /// Generation parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    /// System instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Declared tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

// ── Outgoing ────────────────────────────────────────────────────────────

/// Explicit text turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentFrame {
    /// Turns to append to the conversation.
    pub turns: Vec<Content>,
    /// Whether the model should respond now.
    pub turn_complete: bool,
}

/// Continuous audio/video input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputFrame {
    /// Media chunks in capture order.
    pub media_chunks: Vec<MediaChunk>,
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Id of the triggering function call.
    pub id: String,
    /// Function name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Result payload.
    pub response: Value,
}

impl FunctionResponse {
    /// Create a response for the call with the given id.
    pub fn new(id: impl Into<String>, response: Value) -> Self {
        Self { id: id.into(), name: None, response }
    }

    /// Set the function name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Replies to tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseFrame {
    /// One response per answered call.
    pub function_responses: Vec<FunctionResponse>,
}

/// Frames sent from the client to the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutgoingFrame {
    /// Session setup; must be the first frame on a connection.
    Setup(SetupFrame),
    /// Explicit content turns.
    ClientContent(ClientContentFrame),
    /// Realtime media.
    RealtimeInput(RealtimeInputFrame),
    /// Tool call results.
    ToolResponse(ToolResponseFrame),
}

impl OutgoingFrame {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::ClientContent(_) => "clientContent",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

// ── Incoming ────────────────────────────────────────────────────────────

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call id, echoed back in the [`FunctionResponse`].
    #[serde(default)]
    pub id: String,
    /// Function name.
    pub name: String,
    /// Arguments object.
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A signal carried inside a `serverContent` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerContent {
    /// Streamed model output.
    ModelTurn(Vec<Part>),
    /// The model finished its turn.
    TurnComplete,
    /// The user preempted the model's turn.
    Interrupted,
}

/// Frames received from the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    /// The setup frame was accepted.
    SetupComplete,
    /// Content signals, in the order the session must apply them.
    ServerContent(Vec<ServerContent>),
    /// The model requests tool execution.
    ToolCall(Vec<FunctionCall>),
    /// Previously issued calls are withdrawn.
    ToolCallCancellation(Vec<String>),
    /// The endpoint will close the connection soon.
    GoAway {
        /// Remaining time as reported by the endpoint (e.g. `"10s"`).
        time_left: Option<String>,
    },
}

impl IncomingFrame {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setupComplete",
            Self::ServerContent(_) => "serverContent",
            Self::ToolCall(_) => "toolCall",
            Self::ToolCallCancellation(_) => "toolCallCancellation",
            Self::GoAway { .. } => "goAway",
        }
    }
}
