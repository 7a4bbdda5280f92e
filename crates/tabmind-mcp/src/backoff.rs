//! Reconnect backoff policy.
//!
//! MCP servers are third-party infrastructure with unpredictable
//! uptime; reconnect attempts are spaced by exponential backoff with
//! a ceiling. The policy is a small stateful object owned per server,
//! kept out of the transport so it can be tested on its own.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Initial reconnect delay in milliseconds.
pub const BACKOFF_INITIAL_DELAY_MS: u64 = 500;

/// Multiplier applied on each consecutive failure.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Maximum reconnect delay in milliseconds.
pub const BACKOFF_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff with a ceiling and reset-on-success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    multiplier: u32,
    max_ms: u64,
    /// Consecutive failures since the last success.
    failures: u32,
}

impl Backoff {
    /// Create a policy with explicit bounds.
    pub fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            initial_ms: initial.as_millis() as u64,
            multiplier: multiplier.max(1),
            max_ms: max.as_millis() as u64,
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    ///
    /// The first failure waits the initial delay; each consecutive
    /// failure doubles it (by the configured multiplier) up to the
    /// cap.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.failures.min(31);
        self.failures = self.failures.saturating_add(1);

        let delay = (self.multiplier as u64)
            .checked_pow(exp)
            .and_then(|factor| self.initial_ms.checked_mul(factor))
            .unwrap_or(self.max_ms);

        let delay = delay.min(self.max_ms);
        debug!(
            failures = self.failures,
            delay_ms = delay,
            "Scheduling reconnect"
        );
        Duration::from_millis(delay)
    }

    /// Reset after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(BACKOFF_INITIAL_DELAY_MS),
            BACKOFF_MULTIPLIER,
            Duration::from_millis(BACKOFF_MAX_DELAY_MS),
        )
    }
}

/// Sleep for the given duration unless cancelled first.
///
/// Returns `false` when the sleep was cancelled, so a reconnect loop
/// can stop the moment its server is disabled.
pub async fn sleep_with_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
