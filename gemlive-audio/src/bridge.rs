//! Glue between session events and the playback queue.

use crate::playback::PlaybackQueue;
use gemlive::SessionEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Route session events into `queue` until the event stream ends.
///
/// Audio is queued and `TurnComplete` flushes the end of the turn.
/// `Interrupted` and `Close` cut playback immediately.
pub async fn drive_playback(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    queue: PlaybackQueue,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Audio(chunk) => {
                if let Err(e) = queue.enqueue(&chunk) {
                    warn!(error = %e, "Dropping model audio");
                }
            }
            SessionEvent::TurnComplete(_) => {
                if let Err(e) = queue.finish_turn() {
                    warn!(error = %e, "Dropping end of turn audio");
                }
            }
            SessionEvent::Interrupted => queue.interrupt(),
            SessionEvent::Close(close) => {
                debug!(code = close.code, "Session closed, clearing playback");
                queue.interrupt();
            }
            _ => {}
        }
    }
    debug!("Playback driver finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemlive::{AudioChunk, AudioFormat, CloseEvent, TurnSummary};

    fn audio(samples: &[i16]) -> SessionEvent {
        SessionEvent::Audio(AudioChunk::from_i16_samples(samples, AudioFormat::pcm16_24khz()))
    }

    #[tokio::test]
    async fn test_routes_audio_and_interrupts() {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = PlaybackQueue::new(24_000, 1).unwrap();

        tx.send(audio(&[100; 48])).unwrap();
        tx.send(SessionEvent::Text("hi".into())).unwrap();
        tx.send(SessionEvent::Close(CloseEvent {
            code: 1011,
            reason: "deadline".into(),
            was_clean: true,
            requested: false,
            established: true,
        }))
        .unwrap();
        tx.send(audio(&[100; 24])).unwrap();
        drop(tx);

        drive_playback(rx, queue.clone()).await;
        assert_eq!(queue.queued_samples(), 24);
    }

    #[tokio::test]
    async fn test_turn_complete_flushes_resampled_tail() {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = PlaybackQueue::new(48_000, 1).unwrap();

        tx.send(audio(&[100; 2400])).unwrap();
        tx.send(SessionEvent::TurnComplete(TurnSummary::default())).unwrap();
        tx.send(audio(&[100; 600])).unwrap();
        tx.send(SessionEvent::TurnComplete(TurnSummary::default())).unwrap();
        drop(tx);

        drive_playback(rx, queue.clone()).await;
        assert_eq!(queue.queued_samples(), 2 * (2400 + 600));
    }
}
