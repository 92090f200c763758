//! Volume metering for UI level displays.

use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Last RMS level written by an audio callback.
///
/// Writers are realtime callbacks, so the level is a lock-free atomic.
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter {
    level: Arc<AtomicU32>,
}

impl VolumeMeter {
    /// Create a meter reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new RMS level.
    pub fn set(&self, rms: f32) {
        self.level.store(rms.to_bits(), Ordering::Relaxed);
    }

    /// Current RMS level.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Reset to silence.
    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Sample `meter` every `period`.
pub fn volume_stream(meter: VolumeMeter, period: Duration) -> impl Stream<Item = f32> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            yield meter.level();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_meter_roundtrip() {
        let meter = VolumeMeter::new();
        assert_eq!(meter.level(), 0.0);
        meter.set(0.25);
        assert_eq!(meter.clone().level(), 0.25);
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_stream_samples_periodically() {
        let meter = VolumeMeter::new();
        let stream = volume_stream(meter.clone(), Duration::from_millis(50));
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(0.0));
        meter.set(0.5);
        assert_eq!(stream.next().await, Some(0.5));
    }
}
