//! Desktop audio devices via `cpal`.
//!
//! cpal streams are not `Send` on every host, so each stream is built, played
//! and dropped on its own thread. The opener waits for the thread to report
//! the negotiated format before returning.

use crate::capture::{CaptureControl, CaptureProcessor};
use crate::error::{AudioError, Result};
use crate::playback::PlaybackQueue;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use gemlive::MediaChunk;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Format a device was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name as reported by the host.
    pub name: String,
    /// Stream sample rate.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// Keeps a stream thread alive; dropping it stops the stream.
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_stream<T, F>(name: &str, open: F) -> Result<(StreamThread, T)>
where
    T: Send + 'static,
    F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<T>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match open() {
                Ok((stream, value)) => {
                    let _ = ready_tx.send(Ok(value));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until the sender is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| AudioError::device(format!("failed to spawn {name}: {e}")))?;

    let mut thread = StreamThread { stop: Some(stop_tx), handle: Some(handle) };
    match ready_rx.recv() {
        Ok(Ok(value)) => Ok((thread, value)),
        Ok(Err(e)) => {
            thread.shutdown();
            Err(e)
        }
        Err(_) => {
            thread.shutdown();
            Err(AudioError::device(format!("{name} exited before the stream started")))
        }
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

/// The default microphone feeding a [`CaptureProcessor`].
pub struct InputDevice {
    info: DeviceInfo,
    _thread: StreamThread,
}

impl InputDevice {
    /// Open the host's default input device. Capture starts stopped; call
    /// [`CaptureControl::start`] to begin sending chunks.
    pub fn open_default() -> Result<(Self, CaptureControl, mpsc::UnboundedReceiver<MediaChunk>)> {
        let (thread, (info, control, rx)) = spawn_stream("gemlive-capture", open_input)?;
        info!(
            device = %info.name,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "Input device opened"
        );
        Ok((Self { info, _thread: thread }, control, rx))
    }

    /// Negotiated device format.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

type InputParts = (DeviceInfo, CaptureControl, mpsc::UnboundedReceiver<MediaChunk>);

fn open_input() -> Result<(cpal::Stream, InputParts)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::device("no input device available"))?;
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::device(format!("input config: {e}")))?;

    let info = DeviceInfo {
        name: device_name(&device),
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let (processor, control, rx) = CaptureProcessor::new(info.sample_rate, info.channels)?;
    let config: cpal::StreamConfig = supported.config();
    let err_fn = |err: cpal::StreamError| warn!(error = %err, "Input stream error");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| processor.push_f32(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| processor.push_i16(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> =
                    data.iter().map(|s| (f32::from(*s) - 32768.0) / 32768.0).collect();
                processor.push_f32(&samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::device(format!("unsupported input sample format {other:?}")));
        }
    }
    .map_err(|e| AudioError::device(format!("build input stream: {e}")))?;

    stream.play().map_err(|e| AudioError::device(format!("start input stream: {e}")))?;
    Ok((stream, (info, control, rx)))
}

/// The default speaker draining a [`PlaybackQueue`].
pub struct OutputDevice {
    info: DeviceInfo,
    _thread: StreamThread,
}

impl OutputDevice {
    /// Open the host's default output device.
    pub fn open_default() -> Result<(Self, PlaybackQueue)> {
        let (thread, (info, queue)) = spawn_stream("gemlive-playback", open_output)?;
        info!(
            device = %info.name,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "Output device opened"
        );
        Ok((Self { info, _thread: thread }, queue))
    }

    /// Negotiated device format.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

fn open_output() -> Result<(cpal::Stream, (DeviceInfo, PlaybackQueue))> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::device("no output device available"))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::device(format!("output config: {e}")))?;

    let info = DeviceInfo {
        name: device_name(&device),
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let queue = PlaybackQueue::new(info.sample_rate, info.channels)?;
    let config: cpal::StreamConfig = supported.config();
    let err_fn = |err: cpal::StreamError| warn!(error = %err, "Output stream error");

    let player = queue.clone();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| player.fill(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    player.fill(&mut scratch);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = crate::pcm::f32_to_i16(*s);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::device(format!("unsupported output sample format {other:?}")));
        }
    }
    .map_err(|e| AudioError::device(format!("build output stream: {e}")))?;

    stream.play().map_err(|e| AudioError::device(format!("start output stream: {e}")))?;
    Ok((stream, (info, queue)))
}
