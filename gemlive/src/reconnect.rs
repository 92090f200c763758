//! Reconnection controller.
//!
//! A [`Supervisor`] watches a [`LiveSession`] for abnormal closes of an
//! established connection and makes at most one automatic reconnection per
//! failure. After a successful reconnect it primes the model with a single
//! text turn built from the caller's [`ContextProvider`].

use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use crate::session::{CloseEvent, LiveSession, SessionEvent};
use crate::transport::close_code;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Classification of a close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCategory {
    /// 1000.
    Normal,
    /// 1011, used by the endpoint for deadline exceeded.
    Timeout,
    /// 1007, used by the endpoint for invalid arguments.
    PolicyViolation,
    /// Any other code.
    Other,
}

impl CloseCategory {
    /// Classify a close code.
    pub fn classify(code: u16) -> Self {
        match code {
            close_code::NORMAL => Self::Normal,
            close_code::INTERNAL_ERROR => Self::Timeout,
            close_code::INVALID_PAYLOAD => Self::PolicyViolation,
            _ => Self::Other,
        }
    }
}

/// Reconnection tuning.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait before the reconnect attempt.
    pub delay: Duration,
    /// A reconnected session must stay up this long before another abnormal
    /// close earns a new attempt.
    pub stable_after: Duration,
    /// Whether 1007 closes are retried.
    pub retry_on_policy_violation: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            stable_after: Duration::from_secs(60),
            retry_on_policy_violation: true,
        }
    }
}

impl ReconnectPolicy {
    /// Set the reconnect delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the stability window.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Enable or disable retrying 1007 closes.
    pub fn with_retry_on_policy_violation(mut self, retry: bool) -> Self {
        self.retry_on_policy_violation = retry;
        self
    }

    /// Whether a close of this category gets an automatic reconnect.
    pub fn is_retryable(&self, category: CloseCategory) -> bool {
        match category {
            CloseCategory::Timeout => true,
            CloseCategory::PolicyViolation => self.retry_on_policy_violation,
            CloseCategory::Normal | CloseCategory::Other => false,
        }
    }
}

/// Supplies the conversation summary replayed after a reconnect.
pub trait ContextProvider: Send + Sync {
    /// Text sent as one user turn right after the reconnected session opens.
    /// `None` skips the replay.
    fn resume_context(&self) -> Option<String>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn resume_context(&self) -> Option<String> {
        self()
    }
}

/// Keeps the last few exchanges and renders them as a resume prompt.
#[derive(Debug)]
pub struct RecentTurns {
    capacity: usize,
    turns: Mutex<VecDeque<(Speaker, String)>>,
}

#[derive(Debug, Clone, Copy)]
enum Speaker {
    User,
    Model,
}

impl RecentTurns {
    /// Keep at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), turns: Mutex::new(VecDeque::new()) }
    }

    /// Record a user message.
    pub fn record_user(&self, text: impl Into<String>) {
        self.push(Speaker::User, text.into());
    }

    /// Record a finished model turn.
    pub fn record_model(&self, text: impl Into<String>) {
        self.push(Speaker::Model, text.into());
    }

    fn push(&self, speaker: Speaker, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let mut turns = self.turns.lock();
        if turns.len() == self.capacity {
            turns.pop_front();
        }
        turns.push_back((speaker, text));
    }
}

impl ContextProvider for RecentTurns {
    fn resume_context(&self) -> Option<String> {
        let turns = self.turns.lock();
        if turns.is_empty() {
            return None;
        }
        let mut prompt = String::from(
            "The connection was interrupted. Continue the conversation from where it left off. \
             Recent exchanges:\n",
        );
        for (speaker, text) in turns.iter() {
            let label = match speaker {
                Speaker::User => "User",
                Speaker::Model => "You",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(text.trim());
            prompt.push('\n');
        }
        Some(prompt)
    }
}

/// Events reported by a [`Supervisor`].
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A retryable close was seen; a reconnect follows after the delay.
    Reconnecting {
        /// Close code that triggered the attempt.
        code: u16,
        /// Close reason.
        reason: String,
        /// Its classification.
        category: CloseCategory,
    },
    /// The session is open again and the context turn was sent.
    Reconnected,
    /// A non-retryable abnormal close. The session stays disconnected.
    SessionError(RealtimeError),
    /// The retry budget is spent. Only a manual `connect()` recovers.
    Fatal(RealtimeError),
}

/// Drives automatic reconnection for one session.
pub struct Supervisor {
    session: LiveSession,
    config: SessionConfig,
    context: Arc<dyn ContextProvider>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    watch: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("session", &self.session)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor and the receiver of its events.
    pub fn new(
        session: LiveSession,
        config: SessionConfig,
        context: Arc<dyn ContextProvider>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { session, config, context, policy, events, watch: Mutex::new(None) }, rx)
    }

    /// The supervised session.
    pub fn session(&self) -> &LiveSession {
        &self.session
    }

    /// Connect and start supervising. Resets the retry budget.
    pub async fn connect(&self) -> Result<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.watch.lock().replace(token.clone()) {
            previous.cancel();
        }

        let watcher = Watcher {
            session: self.session.clone(),
            config: self.config.clone(),
            context: self.context.clone(),
            policy: self.policy.clone(),
            out: self.events.clone(),
            cancel: token,
            last_reconnect: None,
        };
        tokio::spawn(watcher.run(self.session.subscribe()));

        self.session.connect(self.config.clone()).await
    }

    /// Stop supervising and disconnect.
    pub fn disconnect(&self) {
        if let Some(token) = self.watch.lock().take() {
            token.cancel();
        }
        self.session.disconnect();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(token) = self.watch.get_mut().take() {
            token.cancel();
        }
    }
}

struct Watcher {
    session: LiveSession,
    config: SessionConfig,
    context: Arc<dyn ContextProvider>,
    policy: ReconnectPolicy,
    out: mpsc::UnboundedSender<SupervisorEvent>,
    cancel: CancellationToken,
    last_reconnect: Option<Instant>,
}

impl Watcher {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let SessionEvent::Close(close) = event {
                if !self.on_close(close).await {
                    break;
                }
            }
        }
    }

    /// Returns `false` once supervision was cancelled.
    async fn on_close(&mut self, close: CloseEvent) -> bool {
        if close.requested || !close.established {
            return true;
        }

        let category = CloseCategory::classify(close.code);
        if category == CloseCategory::Normal {
            info!(session_id = %self.session.session_id(), "Session closed normally");
            return true;
        }

        // Any abnormal close inside the window after a reconnect ends supervision.
        if let Some(at) = self.last_reconnect.take() {
            if at.elapsed() < self.policy.stable_after {
                error!(
                    code = close.code,
                    reason = %close.reason,
                    "Session failed again after reconnect"
                );
                let _ = self.out.send(SupervisorEvent::Fatal(RealtimeError::ReconnectExhausted {
                    code: close.code,
                    reason: close.reason,
                }));
                return true;
            }
        }

        if !self.policy.is_retryable(category) {
            warn!(code = close.code, reason = %close.reason, "Abnormal close, not retrying");
            let _ = self.out.send(SupervisorEvent::SessionError(RealtimeError::AbnormalClosure {
                code: close.code,
                reason: close.reason,
            }));
            return true;
        }

        if category == CloseCategory::PolicyViolation {
            warn!(code = close.code, "Retrying invalid-payload close; it may be rejected again");
        }
        info!(
            code = close.code,
            reason = %close.reason,
            delay = ?self.policy.delay,
            "Reconnecting"
        );
        let _ = self.out.send(SupervisorEvent::Reconnecting {
            code: close.code,
            reason: close.reason.clone(),
            category,
        });

        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(self.policy.delay) => {}
        }

        match self.session.connect(self.config.clone()).await {
            Ok(()) => {
                self.last_reconnect = Some(Instant::now());
                if let Some(context) = self.context.resume_context() {
                    if let Err(e) = self.session.send_text(&context) {
                        warn!(error = %e, "Context replay not sent");
                    }
                }
                info!(session_id = %self.session.session_id(), "Reconnected");
                let _ = self.out.send(SupervisorEvent::Reconnected);
                true
            }
            Err(_) if self.cancel.is_cancelled() => false,
            Err(RealtimeError::Cancelled) => true,
            Err(e) => {
                error!(error = %e, "Reconnect failed");
                let _ = self.out.send(SupervisorEvent::Fatal(RealtimeError::ReconnectExhausted {
                    code: close.code,
                    reason: close.reason,
                }));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(CloseCategory::classify(1000), CloseCategory::Normal);
        assert_eq!(CloseCategory::classify(1011), CloseCategory::Timeout);
        assert_eq!(CloseCategory::classify(1007), CloseCategory::PolicyViolation);
        assert_eq!(CloseCategory::classify(1006), CloseCategory::Other);
    }

    #[test]
    fn test_policy_violation_retry_is_configurable() {
        let policy = ReconnectPolicy::default();
        assert!(policy.is_retryable(CloseCategory::PolicyViolation));
        let policy = policy.with_retry_on_policy_violation(false);
        assert!(!policy.is_retryable(CloseCategory::PolicyViolation));
        assert!(policy.is_retryable(CloseCategory::Timeout));
        assert!(!policy.is_retryable(CloseCategory::Other));
    }

    #[test]
    fn test_recent_turns_keeps_latest() {
        let turns = RecentTurns::new(2);
        assert_eq!(turns.resume_context(), None);
        turns.record_user("first");
        turns.record_model("  ");
        turns.record_model("second");
        turns.record_user("third");

        let prompt = turns.resume_context().unwrap();
        assert!(!prompt.contains("first"));
        assert!(prompt.contains("You: second\nUser: third\n"));
    }

    #[test]
    fn test_closure_context_provider() {
        let provider: Arc<dyn ContextProvider> = Arc::new(|| Some("resume".to_string()));
        assert_eq!(provider.resume_context().as_deref(), Some("resume"));
    }
}
