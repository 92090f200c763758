//! Session state machine.
//!
//! A [`LiveSession`] owns at most one live connection. It sends the setup
//! frame, waits for `setupComplete`, gates outgoing frames on the `Open`
//! state, and turns inbound frames into [`SessionEvent`]s for any number of
//! subscribers.
//!
//! Every connection gets a generation number. Frames and closes from a
//! connection whose generation is no longer current are ignored, so a forced
//! reconnect never leaks events from the previous socket.

use crate::audio::{AudioChunk, AudioFormat};
use crate::codec;
use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use crate::frame::{
    ClientContentFrame, Content, FunctionCall, FunctionResponse, IncomingFrame, MediaChunk,
    OutgoingFrame, Part, RealtimeInputFrame, ServerContent, ToolResponseFrame,
};
use crate::transport::{
    CloseFrame, Connection, Link, Transport, TransportEvent, close_code,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Setup frame sent, waiting for `setupComplete`.
    AwaitingSetupComplete,
    /// Frames may be sent.
    Open,
    /// Tearing the connection down.
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingSetupComplete => "awaiting_setup_complete",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// What a finished model turn contained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Concatenated text of the turn.
    pub text: String,
    /// Number of audio chunks received.
    pub audio_chunks: usize,
    /// Total PCM bytes received.
    pub audio_bytes: usize,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
    /// Whether a close handshake took place.
    pub was_clean: bool,
    /// Whether the close came from `disconnect()` or a replacing `connect()`.
    pub requested: bool,
    /// Whether the connection had reached `Open`.
    pub established: bool,
}

impl CloseEvent {
    /// Whether the close code is 1000.
    pub fn is_normal(&self) -> bool {
        self.code == close_code::NORMAL
    }
}

/// Events emitted by a session, in the order the underlying frames arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// The endpoint accepted the setup frame.
    SetupComplete,
    /// A chunk of model audio.
    Audio(AudioChunk),
    /// A chunk of model text.
    Text(String),
    /// The model requests tool execution. The session never runs tools itself.
    ToolCall(Vec<FunctionCall>),
    /// Previously requested calls are withdrawn.
    ToolCallCancellation(Vec<String>),
    /// The current turn was preempted; stop playback and drop queued audio.
    Interrupted,
    /// The model finished its turn.
    TurnComplete(TurnSummary),
    /// The endpoint announced it will close the connection.
    GoAway(Option<String>),
    /// The connection ended.
    Close(CloseEvent),
}

/// Accumulates the current model turn.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    audio_chunks: usize,
    audio_bytes: usize,
}

impl TurnAccumulator {
    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn push_audio(&mut self, bytes: usize) {
        self.audio_chunks += 1;
        self.audio_bytes += bytes;
    }

    fn finish(&mut self) -> TurnSummary {
        let turn = std::mem::take(self);
        TurnSummary {
            text: turn.text,
            audio_chunks: turn.audio_chunks,
            audio_bytes: turn.audio_bytes,
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

struct Core {
    state: SessionState,
    generation: u64,
    link: Option<Arc<dyn Link>>,
    pending: Option<oneshot::Sender<Result<()>>>,
    established: bool,
    turn: TurnAccumulator,
}

struct Inner {
    id: String,
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

/// A live session over a [`Transport`].
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct LiveSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl LiveSession {
    /// Create a disconnected session.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: uuid::Uuid::new_v4().to_string(),
                transport,
                core: Mutex::new(Core {
                    state: SessionState::Disconnected,
                    generation: 0,
                    link: None,
                    pending: None,
                    established: false,
                    turn: TurnAccumulator::default(),
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Identifier for log correlation.
    pub fn session_id(&self) -> &str {
        &self.inner.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Whether frames may be sent.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Open a connection and complete the setup handshake.
    ///
    /// A live or pending connection is disconnected first. Resolves once
    /// `setupComplete` arrives; fails with `Timeout` if that takes longer than
    /// `config.setup_timeout`, with `Cancelled` if `disconnect()` is called in
    /// the meantime, and with `ConnectionFailure` if the transport cannot
    /// open or closes during setup.
    pub async fn connect(&self, config: SessionConfig) -> Result<()> {
        let url = config.endpoint_url()?;
        let setup = codec::encode(&OutgoingFrame::Setup(config.setup_frame()))?;

        if self.state() != SessionState::Disconnected {
            info!(session_id = %self.inner.id, "Replacing existing connection");
            self.disconnect();
        }

        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut core = self.inner.core.lock();
            core.generation += 1;
            core.pending = Some(tx);
            core.established = false;
            self.inner.transition(&mut core, SessionState::Connecting);
            core.generation
        };
        info!(session_id = %self.inner.id, generation, model = %config.model, "Connecting");

        let handshake = async {
            self.open(generation, &url, setup).await?;
            rx.await.map_err(|_| RealtimeError::Cancelled)?
        };

        match tokio::time::timeout(config.setup_timeout, handshake).await {
            Ok(Ok(())) => {
                info!(session_id = %self.inner.id, generation, "Session open");
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.abandon(generation);
                warn!(session_id = %self.inner.id, generation, error = %e, "Connect failed");
                Err(e)
            }
            Err(_) => {
                self.inner.abandon(generation);
                warn!(session_id = %self.inner.id, generation, "Setup timed out");
                Err(RealtimeError::Timeout(format!(
                    "no setupComplete within {:?}",
                    config.setup_timeout
                )))
            }
        }
    }

    async fn open(&self, generation: u64, url: &Url, setup: String) -> Result<()> {
        let Connection { link, events } = self.inner.transport.connect(url).await?;

        {
            let mut core = self.inner.core.lock();
            if core.generation != generation {
                link.close(close_code::NORMAL, "superseded");
                return Err(RealtimeError::Cancelled);
            }
            debug!(session_id = %self.inner.id, bytes = setup.len(), "Sending setup frame");
            if let Err(e) = link.send(setup) {
                link.close(close_code::NORMAL, "setup not sent");
                return Err(e);
            }
            core.link = Some(link);
            self.inner.transition(&mut core, SessionState::AwaitingSetupComplete);
        }

        tokio::spawn(drive(Arc::downgrade(&self.inner), generation, events));
        Ok(())
    }

    /// Close the connection with code 1000. Safe to call in any state.
    ///
    /// A pending `connect()` fails with `Cancelled`.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        if core.state == SessionState::Disconnected {
            return;
        }
        info!(session_id = %self.inner.id, generation = core.generation, "Disconnecting");
        self.inner.transition(&mut core, SessionState::Closing);

        core.generation += 1;
        let established = std::mem::take(&mut core.established);
        if let Some(link) = core.link.take() {
            link.close(close_code::NORMAL, "client disconnect");
        }
        if let Some(pending) = core.pending.take() {
            let _ = pending.send(Err(RealtimeError::Cancelled));
        }
        core.turn.reset();

        self.inner.transition(&mut core, SessionState::Disconnected);
        self.inner.emit(SessionEvent::Close(CloseEvent {
            code: close_code::NORMAL,
            reason: "client disconnect".to_string(),
            was_clean: true,
            requested: true,
            established,
        }));
    }

    /// Send realtime media chunks (audio/video).
    pub fn send_realtime_input(&self, media_chunks: Vec<MediaChunk>) -> Result<()> {
        self.send_frame(&OutgoingFrame::RealtimeInput(RealtimeInputFrame { media_chunks }))
    }

    /// Send an explicit user turn.
    pub fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()> {
        self.send_frame(&OutgoingFrame::ClientContent(ClientContentFrame {
            turns: vec![Content::user(parts)],
            turn_complete,
        }))
    }

    /// Send a complete text turn.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(vec![Part::text(text)], true)
    }

    /// Reply to tool calls. Each response must carry the id of its call.
    pub fn send_tool_response(&self, function_responses: Vec<FunctionResponse>) -> Result<()> {
        self.send_frame(&OutgoingFrame::ToolResponse(ToolResponseFrame { function_responses }))
    }

    fn send_frame(&self, frame: &OutgoingFrame) -> Result<()> {
        let core = self.inner.core.lock();
        let link = match (&core.link, core.state) {
            (Some(link), SessionState::Open) => link,
            _ => return Err(RealtimeError::NotOpen { state: core.state }),
        };
        let text = codec::encode(frame)?;
        trace!(kind = frame.kind(), bytes = text.len(), "Sending frame");
        link.send(text)
    }
}

impl Inner {
    fn transition(&self, core: &mut Core, next: SessionState) {
        if core.state == next {
            return;
        }
        debug!(session_id = %self.id, from = %core.state, to = %next, "State change");
        core.state = next;
        self.emit(SessionEvent::StateChanged(next));
    }

    fn emit(&self, event: SessionEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Tear down a connect attempt that failed or timed out.
    fn abandon(&self, generation: u64) {
        let mut core = self.core.lock();
        if core.generation != generation {
            return;
        }
        core.generation += 1;
        core.pending = None;
        core.established = false;
        if let Some(link) = core.link.take() {
            link.close(close_code::NORMAL, "connect abandoned");
        }
        self.transition(&mut core, SessionState::Disconnected);
    }

    fn handle_message(&self, generation: u64, message: &Bytes) {
        let frame = match codec::decode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Dropping malformed frame");
                return;
            }
        };

        let mut core = self.core.lock();
        if core.generation != generation {
            trace!(kind = frame.kind(), generation, "Ignoring frame from stale connection");
            return;
        }
        trace!(kind = frame.kind(), "Received frame");

        match frame {
            IncomingFrame::SetupComplete => {
                if core.state != SessionState::AwaitingSetupComplete {
                    warn!(session_id = %self.id, state = %core.state, "Unexpected setupComplete");
                    return;
                }
                core.established = true;
                self.transition(&mut core, SessionState::Open);
                self.emit(SessionEvent::SetupComplete);
                if let Some(pending) = core.pending.take() {
                    let _ = pending.send(Ok(()));
                }
            }
            IncomingFrame::ServerContent(signals) => {
                for signal in signals {
                    self.apply_content(&mut core, signal);
                }
            }
            IncomingFrame::ToolCall(calls) => {
                debug!(count = calls.len(), "Tool call requested");
                self.emit(SessionEvent::ToolCall(calls));
            }
            IncomingFrame::ToolCallCancellation(ids) => {
                debug!(?ids, "Tool calls cancelled");
                self.emit(SessionEvent::ToolCallCancellation(ids));
            }
            IncomingFrame::GoAway { time_left } => {
                warn!(
                    session_id = %self.id,
                    time_left = ?time_left,
                    "Endpoint will close the connection"
                );
                self.emit(SessionEvent::GoAway(time_left));
            }
        }
    }

    fn apply_content(&self, core: &mut Core, signal: ServerContent) {
        match signal {
            ServerContent::ModelTurn(parts) => {
                for part in parts {
                    if let Some(blob) = part.inline_data {
                        if blob.is_audio() {
                            let format =
                                AudioFormat::from_mime_type(&blob.mime_type).unwrap_or_default();
                            core.turn.push_audio(blob.data.len());
                            self.emit(SessionEvent::Audio(AudioChunk::new(blob.data, format)));
                        } else {
                            debug!(mime_type = %blob.mime_type, "Ignoring non-audio inline data");
                        }
                    }
                    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                        core.turn.push_text(&text);
                        self.emit(SessionEvent::Text(text));
                    }
                }
            }
            ServerContent::Interrupted => {
                debug!(session_id = %self.id, "Turn interrupted");
                core.turn.reset();
                self.emit(SessionEvent::Interrupted);
            }
            ServerContent::TurnComplete => {
                let summary = core.turn.finish();
                debug!(
                    session_id = %self.id,
                    text_len = summary.text.len(),
                    audio_chunks = summary.audio_chunks,
                    "Turn complete"
                );
                self.emit(SessionEvent::TurnComplete(summary));
            }
        }
    }

    fn handle_close(&self, generation: u64, frame: CloseFrame) {
        let mut core = self.core.lock();
        if core.generation != generation {
            debug!(generation, code = frame.code, "Ignoring close of stale connection");
            return;
        }
        core.generation += 1;
        core.link = None;
        core.turn.reset();
        let established = std::mem::take(&mut core.established);

        if let Some(pending) = core.pending.take() {
            let _ = pending.send(Err(RealtimeError::connection(format!(
                "connection closed during setup: {} {}",
                frame.code, frame.reason
            ))));
        }

        if frame.code == close_code::NORMAL {
            info!(session_id = %self.id, "Connection closed by endpoint");
        } else {
            warn!(
                session_id = %self.id,
                code = frame.code,
                reason = %frame.reason,
                "Connection closed abnormally"
            );
        }

        self.transition(&mut core, SessionState::Disconnected);
        self.emit(SessionEvent::Close(CloseEvent {
            code: frame.code,
            reason: frame.reason,
            was_clean: frame.was_clean,
            requested: false,
            established,
        }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.core.get_mut().link.take() {
            link.close(close_code::NORMAL, "session dropped");
        }
    }
}

async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Message(message) => inner.handle_message(generation, &message),
            TransportEvent::Closed(frame) => {
                inner.handle_close(generation, frame);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::AwaitingSetupComplete.to_string(), "awaiting_setup_complete");
        assert_eq!(SessionState::Open.to_string(), "open");
    }

    #[test]
    fn test_turn_accumulator_finish_resets() {
        let mut turn = TurnAccumulator::default();
        turn.push_text("Hel");
        turn.push_text("lo");
        turn.push_audio(480);
        turn.push_audio(20);

        let summary = turn.finish();
        assert_eq!(
            summary,
            TurnSummary { text: "Hello".to_string(), audio_chunks: 2, audio_bytes: 500 }
        );
        assert_eq!(turn.finish(), TurnSummary::default());
    }

    #[test]
    fn test_turn_accumulator_reset() {
        let mut turn = TurnAccumulator::default();
        turn.push_text("partial");
        turn.reset();
        assert!(turn.finish().text.is_empty());
    }

    #[test]
    fn test_send_before_connect_fails() {
        let (transport, _accept) = crate::transport::MemoryTransport::new();
        let session = LiveSession::new(transport);
        let err = session.send_text("hi").unwrap_err();
        assert!(matches!(err, RealtimeError::NotOpen { state: SessionState::Disconnected }));
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let (transport, _accept) = crate::transport::MemoryTransport::new();
        let session = LiveSession::new(transport);
        let mut events = session.subscribe();
        session.disconnect();
        session.disconnect();
        assert!(events.try_recv().is_err());
    }
}
