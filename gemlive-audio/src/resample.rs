//! Streaming mono sample-rate conversion.
//!
//! Wraps rubato's fixed-size FFT resampler so callers can push blocks of any
//! length. The resampler's startup delay is trimmed from the output and
//! `flush` drains the tail, so the total output length tracks
//! `input_len * to / from`.

use crate::error::Result;
use rubato::{FftFixedInOut, Resampler as _};

const CHUNK_FRAMES: usize = 1024;

/// Mono resampler from one fixed rate to another.
pub struct Resampler {
    from: u32,
    to: u32,
    inner: Option<FftFixedInOut<f32>>,
    pending: Vec<f32>,
    skip: usize,
    consumed: u64,
    produced: u64,
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Resampler {
    /// Create a resampler. Equal rates pass samples through untouched.
    pub fn new(from: u32, to: u32) -> Result<Self> {
        if from == 0 || to == 0 {
            return Err(crate::error::AudioError::format(format!(
                "sample rates must be non-zero ({from} -> {to})"
            )));
        }
        let inner = if from == to {
            None
        } else {
            Some(FftFixedInOut::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 1)?)
        };
        let skip = inner.as_ref().map_or(0, |r| r.output_delay());
        Ok(Self { from, to, inner, pending: Vec::new(), skip, consumed: 0, produced: 0 })
    }

    /// Input rate.
    pub fn from_rate(&self) -> u32 {
        self.from
    }

    /// Output rate.
    pub fn to_rate(&self) -> u32 {
        self.to
    }

    /// Whether samples pass through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Resample a block. Output lags input by up to one internal chunk.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        self.consumed += input.len() as u64;

        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = inner.process(&[block], None)?;
            if let Some(channel) = resampled.first() {
                self.produced += take_output(channel, &mut self.skip, usize::MAX, &mut out) as u64;
            }
        }
        Ok(out)
    }

    /// Drain buffered input and reset for a new stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        if let Some(inner) = self.inner.as_mut() {
            let expected = self.consumed * u64::from(self.to) / u64::from(self.from);
            // The startup delay spans at most a couple of chunks.
            for _ in 0..8 {
                if self.produced >= expected {
                    break;
                }
                let mut block: Vec<f32> = self.pending.drain(..).collect();
                block.resize(inner.input_frames_next(), 0.0);
                let resampled = inner.process(&[block], None)?;
                let limit = (expected - self.produced) as usize;
                if let Some(channel) = resampled.first() {
                    self.produced += take_output(channel, &mut self.skip, limit, &mut out) as u64;
                }
            }
        }
        self.reset();
        Ok(out)
    }

    /// Drop buffered input and internal state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
        self.produced = 0;
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
            self.skip = inner.output_delay();
        }
    }
}

fn take_output(block: &[f32], skip: &mut usize, limit: usize, out: &mut Vec<f32>) -> usize {
    let start = (*skip).min(block.len());
    *skip -= start;
    let available = &block[start..];
    let n = available.len().min(limit);
    out.extend_from_slice(&available[..n]);
    n
}
