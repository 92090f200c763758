//! Error types for the audio pipeline.

use thiserror::Error;

/// Result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;

/// Errors raised by capture, playback and device setup.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Resampler construction or processing failed.
    #[error("Resample error: {0}")]
    Resample(String),

    /// Invalid stream parameters.
    #[error("Invalid format: {0}")]
    Format(String),

    /// No usable device, or the device rejected the stream.
    #[error("Device error: {0}")]
    Device(String),
}

impl AudioError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create a new format error.
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Self::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for AudioError {
    fn from(e: rubato::ResampleError) -> Self {
        Self::Resample(e.to_string())
    }
}
