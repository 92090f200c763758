//! Layered CLI configuration: TOML file, then environment, then flags.

use crate::cli::{ModalityArg, SessionArgs};
use anyhow::{Context, Result};
use gemlive::{DEFAULT_MODEL, GEMINI_LIVE_URL, ReconnectPolicy, SessionConfig, ToolDefinition};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables checked for the API key, in order.
pub const API_KEY_VARS: &[&str] = &["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instruction: Option<String>,
    pub modality: Option<ModalityArg>,
    pub temperature: Option<f32>,
    pub setup_timeout_secs: Option<u64>,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    pub delay_ms: Option<u64>,
    pub stable_after_secs: Option<u64>,
    pub retry_on_policy_violation: Option<bool>,
}

/// Fully resolved settings.
#[derive(Debug)]
pub struct Settings {
    pub api_key: SecretString,
    pub endpoint: String,
    pub model: String,
    pub voice: Option<String>,
    pub instruction: Option<String>,
    pub modality: Option<ModalityArg>,
    pub temperature: Option<f32>,
    pub setup_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub source: Option<PathBuf>,
}

/// `~/.config/gemlive/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gemlive").join("config.toml"))
}

/// Read a config file. A missing file at the default location is not an
/// error; a missing explicit `--config` is.
pub fn load_file(explicit: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>)> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_path() {
            Some(path) => (path, false),
            None => return Ok((FileConfig::default(), None)),
        },
    };

    if !path.exists() {
        if required {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return Ok((FileConfig::default(), None));
    }

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: FileConfig =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok((file, Some(path)))
}

impl Settings {
    /// Merge the layers. `env` looks up environment variables.
    pub fn resolve(
        file: FileConfig,
        source: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
        flags: &SessionArgs,
    ) -> Result<Self> {
        let env_key = API_KEY_VARS.iter().find_map(|var| env(var).filter(|v| !v.is_empty()));
        let api_key = flags
            .api_key
            .clone()
            .or(env_key)
            .or(file.api_key)
            .with_context(|| {
                format!(
                    "no API key: pass --api-key, set {}, or add api_key to the config file",
                    API_KEY_VARS.join(" or ")
                )
            })?;

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            delay: file.reconnect.delay_ms.map(Duration::from_millis).unwrap_or(defaults.delay),
            stable_after: file
                .reconnect
                .stable_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stable_after),
            retry_on_policy_violation: file
                .reconnect
                .retry_on_policy_violation
                .unwrap_or(defaults.retry_on_policy_violation),
        };

        Ok(Self {
            api_key: SecretString::from(api_key),
            endpoint: flags
                .endpoint
                .clone()
                .or(file.endpoint)
                .unwrap_or_else(|| GEMINI_LIVE_URL.to_string()),
            model: flags.model.clone().or(file.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: flags.voice.clone().or(file.voice),
            instruction: flags.instruction.clone().or(file.instruction),
            modality: flags.modality.or(file.modality),
            temperature: flags.temperature.or(file.temperature),
            setup_timeout: file.setup_timeout_secs.map(Duration::from_secs),
            reconnect,
            source,
        })
    }

    /// Build the session configuration, declaring `tools`.
    pub fn session_config(&self, tools: Vec<ToolDefinition>) -> Result<SessionConfig> {
        let mut builder = SessionConfig::builder(self.api_key.expose_secret())
            .endpoint(self.endpoint.clone())
            .model(self.model.clone())
            .tools(tools);
        if let Some(voice) = &self.voice {
            builder = builder.voice(voice.clone());
        }
        if let Some(instruction) = &self.instruction {
            builder = builder.instruction(instruction.clone());
        }
        if let Some(modality) = self.modality {
            builder = builder.modality(modality.into());
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(timeout) = self.setup_timeout {
            builder = builder.setup_timeout(timeout);
        }
        Ok(builder.build()?)
    }
}
