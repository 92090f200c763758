//! Microphone capture side.
//!
//! [`CaptureProcessor::push_f32`] runs inside the device callback. It
//! downmixes, resamples to 16 kHz, converts to PCM16 and hands fixed-size
//! chunks to an unbounded channel. It never blocks on the network;
//! [`forward_capture`] drains the channel on the async side.
//!
//! No echo cancellation, noise suppression or gain control is applied. The
//! endpoint does its own processing on raw input.

use crate::error::{AudioError, Result};
use crate::meter::VolumeMeter;
use crate::pcm::{downmix, f32_to_i16, i16_to_f32, rms};
use crate::resample::Resampler;
use gemlive::{AudioChunk, AudioFormat, INPUT_SAMPLE_RATE, LiveSession, MediaChunk};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Default duration of one outgoing chunk.
pub const CHUNK_DURATION: Duration = Duration::from_millis(100);

struct CaptureState {
    resampler: Resampler,
    pending: Vec<i16>,
}

struct Shared {
    channels: u16,
    chunk_samples: usize,
    running: AtomicBool,
    state: Mutex<CaptureState>,
    meter: VolumeMeter,
    tx: mpsc::UnboundedSender<MediaChunk>,
}

impl Shared {
    fn emit(&self, samples: &[i16]) {
        let chunk = AudioChunk::from_i16_samples(samples, AudioFormat::pcm16_16khz());
        if self.tx.send(chunk.to_media_chunk()).is_err() {
            trace!("Capture receiver gone");
        }
    }
}

/// Callback-side capture handle.
#[derive(Clone)]
pub struct CaptureProcessor {
    shared: Arc<Shared>,
}

/// Start/stop control for a capture pipeline.
#[derive(Clone)]
pub struct CaptureControl {
    shared: Arc<Shared>,
}

impl CaptureProcessor {
    /// Create a pipeline for a device running at `device_rate` with
    /// `channels` interleaved channels. Capture starts stopped.
    pub fn new(
        device_rate: u32,
        channels: u16,
    ) -> Result<(Self, CaptureControl, mpsc::UnboundedReceiver<MediaChunk>)> {
        Self::with_chunk_duration(device_rate, channels, CHUNK_DURATION)
    }

    /// Like [`CaptureProcessor::new`] with a custom chunk duration.
    pub fn with_chunk_duration(
        device_rate: u32,
        channels: u16,
        chunk: Duration,
    ) -> Result<(Self, CaptureControl, mpsc::UnboundedReceiver<MediaChunk>)> {
        if channels == 0 {
            return Err(AudioError::format("capture needs at least one channel"));
        }
        let chunk_samples = (u128::from(INPUT_SAMPLE_RATE) * chunk.as_millis() / 1000) as usize;
        if chunk_samples == 0 {
            return Err(AudioError::format(format!("chunk duration {chunk:?} is too short")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            channels,
            chunk_samples,
            running: AtomicBool::new(false),
            state: Mutex::new(CaptureState {
                resampler: Resampler::new(device_rate, INPUT_SAMPLE_RATE)?,
                pending: Vec::with_capacity(chunk_samples * 2),
            }),
            meter: VolumeMeter::new(),
            tx,
        });
        debug!(device_rate, channels, chunk_samples, "Capture pipeline created");
        Ok((Self { shared: shared.clone() }, CaptureControl { shared }, rx))
    }

    /// Feed interleaved normalized samples from the device. Dropped while
    /// capture is stopped.
    pub fn push_f32(&self, interleaved: &[f32]) {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return;
        }

        let mono = downmix(interleaved, shared.channels);
        shared.meter.set(rms(&mono));

        let mut state = shared.state.lock();
        match state.resampler.process(&mono) {
            Ok(resampled) => state.pending.extend(resampled.into_iter().map(f32_to_i16)),
            Err(e) => {
                warn!(error = %e, "Dropping capture block");
                return;
            }
        }
        while state.pending.len() >= shared.chunk_samples {
            let chunk: Vec<i16> = state.pending.drain(..shared.chunk_samples).collect();
            shared.emit(&chunk);
        }
    }

    /// Feed interleaved PCM16 samples from the device.
    pub fn push_i16(&self, interleaved: &[i16]) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let samples: Vec<f32> = interleaved.iter().copied().map(i16_to_f32).collect();
        self.push_f32(&samples);
    }
}

impl CaptureControl {
    /// Start accepting samples. Returns `false` if already running.
    pub fn start(&self) -> bool {
        if self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut state = self.shared.state.lock();
            state.pending.clear();
            state.resampler.reset();
        }
        self.shared.running.store(true, Ordering::Release);
        info!("Capture started");
        true
    }

    /// Stop accepting samples and emit the partial chunk. Returns `false` if
    /// already stopped.
    pub fn stop(&self) -> bool {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.shared.state.lock();
        match state.resampler.flush() {
            Ok(tail) => state.pending.extend(tail.into_iter().map(f32_to_i16)),
            Err(e) => warn!(error = %e, "Resampler tail lost"),
        }
        let rest = std::mem::take(&mut state.pending);
        if !rest.is_empty() {
            self.shared.emit(&rest);
        }
        self.shared.meter.reset();
        info!("Capture stopped");
        true
    }

    /// Whether samples are accepted.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Input level meter.
    pub fn meter(&self) -> VolumeMeter {
        self.shared.meter.clone()
    }
}

/// Send captured chunks through `session` until the capture side is dropped.
///
/// Chunks produced while the session is not open are dropped.
pub async fn forward_capture(
    session: LiveSession,
    mut chunks: mpsc::UnboundedReceiver<MediaChunk>,
) {
    let mut dropped: u64 = 0;
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = session.send_realtime_input(vec![chunk]) {
            dropped += 1;
            trace!(error = %e, dropped, "Capture chunk dropped");
        }
    }
    debug!(dropped, "Capture forwarding finished");
}
