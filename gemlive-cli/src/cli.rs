use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gemlive", version)]
#[command(about = "Talk to a Gemini Live model from the terminal", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/gemlive/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags that override the config file and environment.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SessionArgs {
    /// API key (overrides GOOGLE_API_KEY / GEMINI_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// WebSocket endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Model name, e.g. models/gemini-2.0-flash-exp
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Prebuilt voice
    #[arg(long, global = true)]
    pub voice: Option<String>,

    /// System instruction
    #[arg(short, long, global = true)]
    pub instruction: Option<String>,

    /// Response modality
    #[arg(long, value_enum, global = true)]
    pub modality: Option<ModalityArg>,

    /// Sampling temperature
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Stream microphone and speaker audio (requires the desktop-audio feature)
    #[arg(long, global = true)]
    pub audio: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session (default)
    Chat,

    /// List prebuilt voices
    Voices,

    /// Print the resolved configuration with the key redacted
    Config,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalityArg {
    Text,
    Audio,
}

impl From<ModalityArg> for gemlive::Modality {
    fn from(value: ModalityArg) -> Self {
        match value {
            ModalityArg::Text => gemlive::Modality::Text,
            ModalityArg::Audio => gemlive::Modality::Audio,
        }
    }
}
