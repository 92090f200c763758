//! Configuration for live sessions.

use crate::error::{RealtimeError, Result};
use crate::frame::{
    Content, GenerationConfig, Modality, Part, SetupFrame, SpeechConfig, Tool, ToolDefinition,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Available prebuilt voices.
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Default bound on socket open plus setup-complete.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Immutable per-connection configuration.
///
/// Changing any field requires a new connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (without credential).
    pub endpoint: String,
    /// API key, sent as the `key` query parameter.
    pub api_key: SecretString,
    /// Model resource name.
    pub model: String,
    /// Generation parameters.
    pub generation: GenerationConfig,
    /// System instruction text.
    pub instruction: Option<String>,
    /// Declared tools, embedded verbatim in the setup frame.
    pub tools: Vec<ToolDefinition>,
    /// Bound on socket open plus setup-complete.
    pub setup_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for the public endpoint with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: GEMINI_LIVE_URL.to_string(),
            api_key: SecretString::from(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            generation: GenerationConfig::default(),
            instruction: None,
            tools: Vec::new(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// Create a builder.
    pub fn builder(api_key: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder { config: Self::new(api_key) }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.generation.speech_config = Some(SpeechConfig::voice(voice));
        self
    }

    /// Set the response modality.
    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.generation.response_modalities = Some(vec![modality]);
        self
    }

    /// Add a tool definition.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// The endpoint URL with the credential attached.
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| {
                RealtimeError::config(format!("invalid endpoint '{}': {e}", self.endpoint))
            })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::config(format!(
                    "endpoint scheme must be ws or wss, got '{other}'"
                )));
            }
        }
        let key = self.api_key.expose_secret();
        if !key.is_empty() {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    /// Build the setup frame for this configuration.
    pub fn setup_frame(&self) -> SetupFrame {
        let generation_config =
            (self.generation != GenerationConfig::default()).then(|| self.generation.clone());

        let system_instruction = self
            .instruction
            .as_ref()
            .map(|text| Content { role: None, parts: vec![Part::text(text.clone())] });

        let tools = if self.tools.is_empty() {
            None
        } else {
            Some(vec![Tool { function_declarations: self.tools.clone() }])
        };

        SetupFrame { model: self.model.clone(), generation_config, system_instruction, tools }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.generation.speech_config = Some(SpeechConfig::voice(voice));
        self
    }

    /// Set the response modality.
    pub fn modality(mut self, modality: Modality) -> Self {
        self.config.generation.response_modalities = Some(vec![modality]);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.config.tools.push(tool);
        self
    }

    /// Set multiple tools.
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.config.tools = tools;
        self
    }

    /// Set the setup timeout.
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.config.setup_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<SessionConfig> {
        if self.config.model.trim().is_empty() {
            return Err(RealtimeError::config("model must not be empty"));
        }
        if self.config.setup_timeout.is_zero() {
            return Err(RealtimeError::config("setup timeout must be non-zero"));
        }
        self.config.endpoint_url()?;
        Ok(self.config)
    }
}
