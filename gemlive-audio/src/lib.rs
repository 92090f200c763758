//! # gemlive-audio
//!
//! Audio pipeline for [`gemlive`] sessions.
//!
//! ```text
//!  mic callback ──► CaptureProcessor ──► mpsc ──► forward_capture ──► LiveSession
//!                   (downmix, 16 kHz,                                     │
//!                    PCM16, 100 ms)                                       ▼
//!  speaker callback ◄── PlaybackQueue ◄── drive_playback ◄──────── SessionEvent
//!                       (resample, gapless,
//!                        interrupt)
//! ```
//!
//! Device callbacks only touch [`CaptureProcessor`] and [`PlaybackQueue`];
//! neither blocks on the network. Enable the `desktop-audio` feature for a
//! `cpal` backend in [`device`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use gemlive_audio::{PlaybackQueue, drive_playback};
//!
//! let queue = PlaybackQueue::new(48_000, 2)?;
//! tokio::spawn(drive_playback(session.subscribe(), queue.clone()));
//! // In the device callback:
//! queue.fill(output_buffer);
//! ```

pub mod bridge;
pub mod capture;
#[cfg(feature = "desktop-audio")]
pub mod device;
pub mod error;
pub mod meter;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use bridge::drive_playback;
pub use capture::{CHUNK_DURATION, CaptureControl, CaptureProcessor, forward_capture};
#[cfg(feature = "desktop-audio")]
pub use device::{DeviceInfo, InputDevice, OutputDevice};
pub use error::{AudioError, Result};
pub use meter::{VolumeMeter, volume_stream};
pub use playback::PlaybackQueue;
pub use resample::Resampler;
