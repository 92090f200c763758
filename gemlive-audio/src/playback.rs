//! Gapless playback of model audio.
//!
//! Chunks from the session are resampled to the device rate and appended to
//! a sample queue. The device callback pulls from the front of the queue
//! through [`PlaybackQueue::fill`], so consecutive chunks play back to back
//! with no gap. [`PlaybackQueue::finish_turn`] drains what the resampler
//! still holds once a turn ends. An interruption drops everything queued,
//! including the rest of the buffer currently playing.

use crate::error::{AudioError, Result};
use crate::meter::VolumeMeter;
use crate::pcm::{i16_to_f32, rms};
use crate::resample::Resampler;
use gemlive::AudioChunk;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, trace};

struct Shared {
    device_rate: u32,
    channels: u16,
    running: AtomicBool,
    epoch: AtomicU64,
    queue: Mutex<VecDeque<f32>>,
    resampler: Mutex<Option<Resampler>>,
    meter: VolumeMeter,
}

/// Shared playback buffer between the session side and the device callback.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("device_rate", &self.shared.device_rate)
            .field("channels", &self.shared.channels)
            .field("queued", &self.queued_samples())
            .finish()
    }
}

impl PlaybackQueue {
    /// Create a queue for a device at `device_rate` with `channels`
    /// interleaved output channels. Playback starts running.
    pub fn new(device_rate: u32, channels: u16) -> Result<Self> {
        if device_rate == 0 || channels == 0 {
            return Err(AudioError::format(format!(
                "invalid playback format ({device_rate} Hz, {channels} channels)"
            )));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                device_rate,
                channels,
                running: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                queue: Mutex::new(VecDeque::new()),
                resampler: Mutex::new(None),
                meter: VolumeMeter::new(),
            }),
        })
    }

    /// Device sample rate.
    pub fn device_rate(&self) -> u32 {
        self.shared.device_rate
    }

    /// Device channel count.
    pub fn channels(&self) -> u16 {
        self.shared.channels
    }

    /// Queue a chunk of model audio behind whatever is already queued.
    ///
    /// Dropped while playback is stopped. Audio resampled across an
    /// [`interrupt`](Self::interrupt) is discarded.
    pub fn enqueue(&self, chunk: &AudioChunk) -> Result<()> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            trace!("Playback stopped, dropping chunk");
            return Ok(());
        }
        let epoch = shared.epoch.load(Ordering::Acquire);

        let mono: Vec<f32> = chunk.to_i16_samples().into_iter().map(i16_to_f32).collect();
        let source_rate = chunk.format.sample_rate;

        let samples = {
            let mut slot = shared.resampler.lock();
            let resampler = match slot.take() {
                Some(r) if r.from_rate() == source_rate => r,
                Some(mut previous) => {
                    // Rate changed mid-stream: play what the old rate still holds.
                    let mut tail = previous.flush()?;
                    let mut next = self.new_resampler(source_rate)?;
                    tail.extend(next.process(&mono)?);
                    *slot = Some(next);
                    drop(slot);
                    return self.append(epoch, tail);
                }
                None => self.new_resampler(source_rate)?,
            };
            slot.insert(resampler).process(&mono)?
        };
        self.append(epoch, samples)
    }

    /// Mark the end of a model turn.
    ///
    /// Drains the audio the resampler still holds so the whole turn plays
    /// before anything queued for the next one.
    pub fn finish_turn(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let epoch = shared.epoch.load(Ordering::Acquire);
        let tail = match shared.resampler.lock().as_mut() {
            Some(resampler) => resampler.flush()?,
            None => return Ok(()),
        };
        trace!(samples = tail.len(), "Turn tail flushed");
        self.append(epoch, tail)
    }

    fn new_resampler(&self, source_rate: u32) -> Result<Resampler> {
        debug!(source_rate, device_rate = self.shared.device_rate, "Playback resampler created");
        Resampler::new(source_rate, self.shared.device_rate)
    }

    fn append(&self, epoch: u64, samples: Vec<f32>) -> Result<()> {
        let shared = &self.shared;
        let mut queue = shared.queue.lock();
        if shared.epoch.load(Ordering::Acquire) != epoch {
            trace!("Interrupted while resampling, dropping samples");
            return Ok(());
        }
        queue.extend(samples);
        Ok(())
    }

    /// Fill an interleaved device buffer. Writes silence on underrun or while
    /// stopped. Runs on the device callback.
    pub fn fill(&self, out: &mut [f32]) {
        let shared = &self.shared;
        let channels = usize::from(shared.channels);
        if !shared.running.load(Ordering::Acquire) {
            out.fill(0.0);
            shared.meter.reset();
            return;
        }

        let frames = out.len() / channels;
        let mut played = Vec::with_capacity(frames);
        {
            let mut queue = shared.queue.lock();
            let n = frames.min(queue.len());
            played.extend(queue.drain(..n));
        }

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            frame.fill(played.get(i).copied().unwrap_or(0.0));
        }
        shared.meter.set(rms(&played));
    }

    /// Drop all queued audio and the rest of the current buffer.
    pub fn interrupt(&self) {
        let shared = &self.shared;
        shared.epoch.fetch_add(1, Ordering::AcqRel);
        let dropped = {
            let mut queue = shared.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if let Some(resampler) = shared.resampler.lock().as_mut() {
            resampler.reset();
        }
        shared.meter.reset();
        debug!(dropped, "Playback interrupted");
    }

    /// Resume playback. Returns `false` if already running.
    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("Playback started");
        true
    }

    /// Stop playback and drop queued audio. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.interrupt();
        info!("Playback stopped");
        true
    }

    /// Whether playback is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Mono samples waiting to be played.
    pub fn queued_samples(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether nothing is waiting to be played.
    pub fn is_idle(&self) -> bool {
        self.queued_samples() == 0
    }

    /// Output level meter.
    pub fn meter(&self) -> VolumeMeter {
        self.shared.meter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemlive::AudioFormat;

    fn chunk(samples: &[i16]) -> AudioChunk {
        AudioChunk::from_i16_samples(samples, AudioFormat::pcm16_24khz())
    }

    #[test]
    fn test_plays_chunks_back_to_back() {
        let queue = PlaybackQueue::new(24_000, 1).unwrap();
        queue.enqueue(&chunk(&[16384; 3])).unwrap();
        queue.enqueue(&chunk(&[-16384; 3])).unwrap();
        assert_eq!(queue.queued_samples(), 6);

        let mut out = [1.0f32; 8];
        queue.fill(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.5, -0.5, -0.5, -0.5, 0.0, 0.0]);
        assert!(queue.is_idle());
        assert!((queue.meter().level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_duplicates_mono_across_channels() {
        let queue = PlaybackQueue::new(24_000, 2).unwrap();
        queue.enqueue(&chunk(&[16384, 0])).unwrap();

        let mut out = [9.0f32; 6];
        queue.fill(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_interrupt_clears_queue() {
        let queue = PlaybackQueue::new(24_000, 1).unwrap();
        queue.enqueue(&chunk(&[1000; 480])).unwrap();
        queue.interrupt();
        assert!(queue.is_idle());

        let mut out = [1.0f32; 16];
        queue.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(queue.meter().level(), 0.0);
    }

    #[test]
    fn test_stop_drops_and_silences() {
        let queue = PlaybackQueue::new(24_000, 1).unwrap();
        assert!(!queue.start());
        queue.enqueue(&chunk(&[1000; 10])).unwrap();

        assert!(queue.stop());
        assert!(!queue.stop());
        assert!(queue.is_idle());
        queue.enqueue(&chunk(&[1000; 10])).unwrap();
        assert!(queue.is_idle());

        let mut out = [1.0f32; 4];
        queue.fill(&mut out);
        assert_eq!(out, [0.0; 4]);

        assert!(queue.start());
        queue.enqueue(&chunk(&[1000; 10])).unwrap();
        assert_eq!(queue.queued_samples(), 10);
    }

    #[test]
    fn test_resamples_to_device_rate() {
        let queue = PlaybackQueue::new(48_000, 1).unwrap();
        for _ in 0..10 {
            queue.enqueue(&chunk(&[0; 2400])).unwrap();
        }
        // One internal resampler block may still be buffered.
        let queued = queue.queued_samples();
        assert!(queued <= 48_000 && queued >= 48_000 - 4096, "{queued}");
    }

    #[test]
    fn test_finish_turn_plays_whole_turn() {
        let queue = PlaybackQueue::new(48_000, 1).unwrap();
        queue.enqueue(&chunk(&[1000; 2400])).unwrap();
        assert!(queue.queued_samples() < 4800);
        queue.finish_turn().unwrap();
        assert_eq!(queue.queued_samples(), 4800);

        // Next turn starts from an empty resampler.
        queue.enqueue(&chunk(&[1000; 600])).unwrap();
        queue.finish_turn().unwrap();
        assert_eq!(queue.queued_samples(), 4800 + 1200);
    }

    #[test]
    fn test_finish_turn_after_interrupt_adds_nothing() {
        let queue = PlaybackQueue::new(48_000, 1).unwrap();
        queue.enqueue(&chunk(&[1000; 600])).unwrap();
        queue.interrupt();
        queue.finish_turn().unwrap();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_rejects_invalid_format() {
        assert!(PlaybackQueue::new(0, 1).is_err());
        assert!(PlaybackQueue::new(48_000, 0).is_err());
    }
}
