//! Capped multiplicative backoff for rate-limited requests.

use std::time::Duration;

/// After a rate-limited response without a server-suggested delay the next
/// attempt waits `previous * DELAY_FACTOR` milliseconds.
pub const DELAY_FACTOR: u64 = 2;

/// Floor for the first computed delay: a zero previous delay would otherwise
/// never grow without a server hint.
pub const FIRST_RETRY_DELAY_MS: u64 = 100;

/// Hard ceiling after which the request fails with a terminal rate-limit
/// error instead of being rescheduled.
pub const MAX_DELAY_MS: u64 = 5 * 60 * 1000;

/// Compute the next retry delay: the server-suggested value when present,
/// otherwise the previous delay multiplied by `factor`, floored at the first
/// retry interval.
pub fn next_delay(server_suggested: Option<u64>, previous_ms: u64, factor: u64) -> u64 {
    match server_suggested {
        Some(suggested) => suggested,
        None => (previous_ms * factor).max(FIRST_RETRY_DELAY_MS),
    }
}

/// Per-invocation retry bookkeeping.
///
/// Created at zero for a call's first attempt, replaced (not mutated) on
/// every rate-limited response, discarded on success or terminal failure.
/// Never shared between concurrent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    delay_ms: u64,
    attempt: u32,
}

impl RetryState {
    pub fn initial() -> Self {
        Self { delay_ms: 0, attempt: 0 }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The state for the next attempt.
    #[must_use]
    pub fn next(self, server_suggested: Option<u64>) -> Self {
        Self {
            delay_ms: next_delay(server_suggested, self.delay_ms, DELAY_FACTOR),
            attempt: self.attempt + 1,
        }
    }

    /// Whether this state's delay has passed the ceiling.
    pub fn exhausted(&self) -> bool {
        self.delay_ms > MAX_DELAY_MS
    }

    /// Wait out this state's delay without blocking the runtime: the timer
    /// is awaited, never slept on a thread.
    pub async fn wait(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_suggested_delay_wins() {
        assert_eq!(next_delay(Some(500), 0, DELAY_FACTOR), 500);
        assert_eq!(next_delay(Some(50), 10_000, DELAY_FACTOR), 50);
    }

    #[test]
    fn growth_is_floored_on_first_retry() {
        assert_eq!(next_delay(None, 0, DELAY_FACTOR), FIRST_RETRY_DELAY_MS);
    }

    #[test]
    fn delays_are_non_decreasing_until_the_ceiling() {
        let mut state = RetryState::initial();
        let mut previous = 0;
        let mut steps = 0;
        while !state.exhausted() {
            state = state.next(None);
            assert!(state.delay_ms() >= previous);
            previous = state.delay_ms();
            steps += 1;
            assert!(steps < 64, "backoff never reached the ceiling");
        }
        assert!(state.delay_ms() > MAX_DELAY_MS);
        // 100ms doubling passes the 5 minute ceiling within a dozen steps.
        assert!(steps <= 13);
    }

    #[test]
    fn attempts_are_counted() {
        let state = RetryState::initial().next(None).next(None);
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn huge_server_suggestion_exhausts_immediately() {
        let state = RetryState::initial().next(Some(MAX_DELAY_MS + 1));
        assert!(state.exhausted());
    }
}
