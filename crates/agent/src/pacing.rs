//! Human-like read/typing delays for a turn.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use maitre_core::config::DialogueConfig;
use maitre_core::domain::conversation::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaceOutcome {
    Elapsed,
    Cancelled,
}

/// Receives the "read" and "typing" signals a chat front end would show.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn read(&self, session_id: &SessionId);
    async fn typing(&self, session_id: &SessionId, estimate: Duration);
}

/// Presence sink for surfaces without indicators; signals only reach the log.
#[derive(Clone, Default)]
pub struct TracingPresence;

#[async_trait]
impl PresenceSink for TracingPresence {
    async fn read(&self, session_id: &SessionId) {
        debug!(event_name = "dialogue.presence.read", session_id = %session_id.0);
    }

    async fn typing(&self, session_id: &SessionId, estimate: Duration) {
        debug!(
            event_name = "dialogue.presence.typing",
            session_id = %session_id.0,
            estimate_ms = estimate.as_millis() as u64,
        );
    }
}

#[derive(Clone, Debug)]
pub struct Pacer {
    enabled: bool,
    read_ack_max: Duration,
    reading_per_char: Duration,
    thinking_max: Duration,
    typing_per_char: Duration,
}

impl Pacer {
    pub fn from_config(config: &DialogueConfig) -> Self {
        Self {
            enabled: config.pacing_enabled,
            read_ack_max: Duration::from_millis(config.read_ack_max_ms),
            reading_per_char: Duration::from_millis(config.reading_ms_per_char),
            thinking_max: Duration::from_millis(config.thinking_max_ms),
            typing_per_char: Duration::from_millis(config.typing_ms_per_char),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            read_ack_max: Duration::ZERO,
            reading_per_char: Duration::ZERO,
            thinking_max: Duration::ZERO,
            typing_per_char: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Uniform in `[0, read_ack_max]`.
    pub fn read_ack_delay(&self) -> Duration {
        if !self.enabled || self.read_ack_max.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.read_ack_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub fn thinking_delay(&self, chars: usize) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        per_char(self.reading_per_char, chars).min(self.thinking_max)
    }

    /// Rough time a person would need to type `chars` characters.
    pub fn typing_estimate(&self, chars: usize) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        per_char(self.typing_per_char, chars)
    }

    /// Sleeps for `delay` unless `cancel` fires first.
    pub async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> PaceOutcome {
        if cancel.is_cancelled() {
            return PaceOutcome::Cancelled;
        }
        if delay.is_zero() {
            return PaceOutcome::Elapsed;
        }
        tokio::select! {
            _ = cancel.cancelled() => PaceOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => PaceOutcome::Elapsed,
        }
    }
}

fn per_char(unit: Duration, chars: usize) -> Duration {
    unit.saturating_mul(u32::try_from(chars).unwrap_or(u32::MAX))
}
