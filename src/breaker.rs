//! Circuit breaker guarding the job server.
//!
//! Counts consecutive connectivity failures of the job-related calls and
//! short-circuits them for a cooldown window once the threshold is reached.
//!
//! # State Machine
//!
//! ```text
//! Closed --[threshold-th consecutive failure]--> Open
//! Open --[cooldown elapsed]--> Cooling
//! Cooling --[probe succeeds]--> Closed (counter reset)
//! Cooling --[probe fails]--> Open (cooldown restarted)
//! ```
//!
//! Only transport failures are recorded here. Device faults belong to the
//! per-job retry loop and never reach the breaker.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit (default: 5).
    pub failure_threshold: u32,
    /// How long the circuit stays open after the tripping failure (default: 30s).
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// Cooldown elapsed; the next call is let through as a probe.
    Cooling,
}

#[derive(Debug)]
struct BreakerInner {
    consecutive_failures: u32,
    /// `None` until the circuit trips for the first time.
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // The inner state is two plain fields; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` while the circuit is open.
    pub fn allow(&self) -> bool {
        let inner = self.lock();
        !self.is_open(&inner, Instant::now())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.consecutive_failures >= self.config.failure_threshold {
            tracing::info!("Circuit breaker closed after successful probe");
        }
        inner.consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let threshold = self.config.failure_threshold;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1).min(threshold);
        if inner.consecutive_failures >= threshold {
            let was_open = self.is_open(&inner, Instant::now());
            inner.open_until = Some(Instant::now() + self.config.cooldown);
            if !was_open {
                tracing::warn!(
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Circuit breaker opened"
                );
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        if inner.consecutive_failures < self.config.failure_threshold {
            CircuitState::Closed
        } else if self.is_open(&inner, Instant::now()) {
            CircuitState::Open
        } else {
            CircuitState::Cooling
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time left before a probe is allowed, if the circuit is open.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let inner = self.lock();
        let now = Instant::now();
        if self.is_open(&inner, now) {
            inner.open_until.map(|until| until - now)
        } else {
            None
        }
    }

    fn is_open(&self, inner: &BreakerInner, now: Instant) -> bool {
        inner.consecutive_failures >= self.config.failure_threshold
            && inner.open_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_four_failures_keep_circuit_closed() {
        let breaker = CircuitBreaker::default();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_saturates_at_threshold() {
        let breaker = CircuitBreaker::default();
        for _ in 0..50 {
            breaker.record_failure();
        }
        assert_eq!(breaker.consecutive_failures(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_cooldown_counts_down() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.remaining_cooldown(), Some(Duration::from_secs(30)));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.remaining_cooldown(), Some(Duration::from_secs(20)));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(breaker.remaining_cooldown(), None);
    }
}
