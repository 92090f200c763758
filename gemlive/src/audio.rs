//! Audio format definitions shared by the session and the audio pipeline.

use crate::frame::MediaChunk;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sample rate the endpoint expects for microphone input.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate the endpoint uses for audio output unless the mime type says otherwise.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// PCM16 mono audio format at a given sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new PCM16 format.
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self { sample_rate, channels }
    }

    /// PCM16 mono at 24kHz (endpoint output default).
    pub fn pcm16_24khz() -> Self {
        Self::new(OUTPUT_SAMPLE_RATE, 1)
    }

    /// PCM16 mono at 16kHz (endpoint input).
    pub fn pcm16_16khz() -> Self {
        Self::new(INPUT_SAMPLE_RATE, 1)
    }

    /// Parse an `audio/pcm;rate=NNNN` mime type.
    ///
    /// Returns `None` for non-audio mime types. Audio mime types without a
    /// `rate` parameter fall back to [`OUTPUT_SAMPLE_RATE`].
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let mut params = mime_type.split(';').map(str::trim);
        let essence = params.next()?;
        if !essence.to_ascii_lowercase().starts_with("audio/") {
            return None;
        }
        let rate = params
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, v)| v.trim().parse::<u32>().ok())
            .unwrap_or(OUTPUT_SAMPLE_RATE);
        Some(Self::new(rate, 1))
    }

    /// Mime type describing this format on the wire.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// Duration in milliseconds of the given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }
}

/// A buffer of PCM16 little-endian audio with its format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw PCM16 LE bytes.
    pub data: Bytes,
    /// Audio format of this chunk.
    pub format: AudioFormat,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(data: impl Into<Bytes>, format: AudioFormat) -> Self {
        Self { data: data.into(), format }
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.format.duration_ms(self.data.len())
    }

    /// Create a chunk from i16 samples (PCM16 little-endian).
    pub fn from_i16_samples(samples: &[i16], format: AudioFormat) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(data, format)
    }

    /// Samples of this chunk. A trailing odd byte is ignored.
    pub fn to_i16_samples(&self) -> Vec<i16> {
        self.data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    /// Wrap this chunk as a realtime media chunk.
    pub fn to_media_chunk(&self) -> MediaChunk {
        MediaChunk::new(self.format.mime_type(), self.data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_parsing() {
        assert_eq!(
            AudioFormat::from_mime_type("audio/pcm;rate=24000"),
            Some(AudioFormat::pcm16_24khz())
        );
        assert_eq!(
            AudioFormat::from_mime_type("audio/pcm; rate=16000"),
            Some(AudioFormat::pcm16_16khz())
        );
        assert_eq!(AudioFormat::from_mime_type("audio/pcm"), Some(AudioFormat::pcm16_24khz()));
        assert_eq!(AudioFormat::from_mime_type("image/jpeg"), None);
        assert_eq!(AudioFormat::from_mime_type("text/plain;rate=16000"), None);
    }

    #[test]
    fn test_audio_format_bytes_per_second() {
        assert_eq!(AudioFormat::pcm16_24khz().bytes_per_second(), 48000);
        assert_eq!(AudioFormat::pcm16_16khz().bytes_per_second(), 32000);
    }

    #[test]
    fn test_audio_format_duration() {
        let format = AudioFormat::pcm16_16khz();
        assert!((format.duration_ms(3200) - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_i16_samples() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN];
        let chunk = AudioChunk::from_i16_samples(&samples, AudioFormat::pcm16_16khz());
        assert_eq!(chunk.data.len(), 10);
        assert_eq!(chunk.to_i16_samples(), samples);
    }

    #[test]
    fn test_to_media_chunk() {
        let chunk = AudioChunk::new(vec![1u8, 2, 3, 4], AudioFormat::pcm16_16khz());
        let media = chunk.to_media_chunk();
        assert_eq!(media.mime_type, "audio/pcm;rate=16000");
        assert_eq!(media.data, vec![1, 2, 3, 4]);
    }
}
