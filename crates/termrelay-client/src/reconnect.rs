//! Reconnection policy layered above the socket lifecycle.

use std::time::Duration;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    Requested,
    /// The server closed the socket.
    Remote,
    /// The socket could not be opened or failed mid-stream.
    Failed,
}

/// Which closes trigger a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectTrigger {
    /// Only transport failures.
    #[default]
    OnFailure,
    /// Failures and server-initiated closes.
    OnAnyClose,
}

/// Exponential backoff schedule plus trigger condition.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub trigger: ReconnectTrigger,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(5),
            trigger: ReconnectTrigger::OnFailure,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether to retry after `attempt` retries already made.
    pub fn should_reconnect(&self, attempt: u32, reason: CloseReason) -> bool {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return false;
        }
        match (reason, self.trigger) {
            (CloseReason::Requested, _) => false,
            (CloseReason::Failed, _) => true,
            (CloseReason::Remote, ReconnectTrigger::OnAnyClose) => true,
            (CloseReason::Remote, ReconnectTrigger::OnFailure) => false,
        }
    }
}
