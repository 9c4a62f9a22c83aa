//! Circuit Breaker for chain-scoped operations
//!
//! One breaker per chain decides whether a call against that chain is
//! attempted at all. Admission and result recording are the only ways the
//! state changes.
//!
//! ## Circuit Breaker States
//!
//! ```text
//! CLOSED ──error_threshold──> OPEN ──recovery_timeout──> HALF_OPEN
//!   ↑                          ↑                            │
//!   │                          └────────── failure ─────────┤
//!   └───────────────────────────────────── success ─────────┘
//! ```
//!
//! - **CLOSED**: Normal operation, all calls pass through
//! - **OPEN**: Chain is failing, calls are rejected without being attempted
//! - **HALF_OPEN**: One trial call is let through; its outcome decides

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use types::{ChainId, CircuitState};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// How long to wait after the last failure before a trial call (OPEN -> HALF_OPEN)
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&router_config::CircuitBreakerSettings::default())
    }
}

impl From<&router_config::CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &router_config::CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.error_threshold.max(1),
            recovery_timeout: settings.recovery_timeout(),
        }
    }
}

/// Statistics for circuit breaker monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub chain_id: ChainId,
    pub current_state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub calls_rejected: u64,
    /// Milliseconds since the last recorded failure
    pub since_last_failure_ms: Option<u64>,
}

impl CircuitBreakerStats {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}

/// A call the breaker refused, with the time left until a trial is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub retry_after: Duration,
}

/// Internal state for the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    trial_in_flight: bool,
    last_failure_time: Option<Instant>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_in_flight: false,
            last_failure_time: None,
        }
    }

    fn transition_to(&mut self, chain_id: ChainId, new_state: CircuitState) {
        if self.state != new_state {
            tracing::info!(
                chain_id,
                "Circuit breaker state transition: {:?} -> {:?}",
                self.state,
                new_state
            );
            self.state = new_state;
            self.trial_in_flight = false;
            if new_state == CircuitState::Closed {
                self.consecutive_failures = 0;
            }
        }
    }
}

/// Circuit breaker guarding one chain
#[derive(Debug)]
pub struct CircuitBreaker {
    chain_id: ChainId,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,

    // Atomic counters for statistics
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    calls_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(chain_id: ChainId, config: CircuitBreakerConfig) -> Self {
        Self {
            chain_id,
            config,
            state: Mutex::new(CircuitBreakerState::new()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            calls_rejected: AtomicU64::new(0),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, as admission would see it right now.
    ///
    /// An OPEN breaker whose recovery timeout has elapsed reports HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        let guard = self.state.lock();
        match guard.state {
            CircuitState::Open if self.recovery_elapsed(&guard) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Decide whether a call may proceed. Every admitted call must be
    /// followed by exactly one [`record_result`](Self::record_result).
    pub fn try_acquire(&self) -> Result<(), Rejected> {
        let mut guard = self.state.lock();

        let admitted = match guard.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.recovery_elapsed(&guard) {
                    guard.transition_to(self.chain_id, CircuitState::HalfOpen);
                    guard.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if guard.trial_in_flight {
                    false
                } else {
                    guard.trial_in_flight = true;
                    true
                }
            }
        };

        if admitted {
            Ok(())
        } else {
            self.calls_rejected.fetch_add(1, Ordering::Relaxed);
            Err(Rejected {
                retry_after: self.retry_after(&guard),
            })
        }
    }

    /// Record call result and update circuit state
    pub fn record_result(&self, success: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut guard = self.state.lock();

        if success {
            guard.consecutive_failures = 0;
            if guard.state == CircuitState::HalfOpen {
                guard.transition_to(self.chain_id, CircuitState::Closed);
            }
        } else {
            guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
            guard.last_failure_time = Some(Instant::now());

            match guard.state {
                CircuitState::Closed => {
                    if guard.consecutive_failures >= self.config.failure_threshold {
                        tracing::warn!(
                            chain_id = self.chain_id,
                            failures = guard.consecutive_failures,
                            "Circuit breaker opened"
                        );
                        guard.transition_to(self.chain_id, CircuitState::Open);
                    }
                }
                CircuitState::HalfOpen => {
                    guard.transition_to(self.chain_id, CircuitState::Open);
                }
                // Stay open; the failure time above restarts the recovery window
                CircuitState::Open => {}
            }
        }
    }

    /// Get current circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let current_state = self.state();
        let guard = self.state.lock();

        CircuitBreakerStats {
            chain_id: self.chain_id,
            current_state,
            consecutive_failures: guard.consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            calls_rejected: self.calls_rejected.load(Ordering::Relaxed),
            since_last_failure_ms: guard
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }

    fn recovery_elapsed(&self, guard: &CircuitBreakerState) -> bool {
        guard
            .last_failure_time
            .map(|t| t.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true)
    }

    fn retry_after(&self, guard: &CircuitBreakerState) -> Duration {
        match guard.last_failure_time {
            Some(t) => self.config.recovery_timeout.saturating_sub(t.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            1,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_millis(recovery_ms),
            },
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap();
        cb.record_result(false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exact_threshold() {
        let cb = breaker(3, 1_000);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.try_acquire().unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_millis(1_000));
        assert_eq!(cb.stats().calls_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker(3, 1_000);
        fail(&cb);
        fail(&cb);
        cb.try_acquire().unwrap();
        cb.record_result(true);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_on_success() {
        let cb = breaker(2, 1_000);
        fail(&cb);
        fail(&cb);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.try_acquire().unwrap();
        // Only one trial at a time
        assert!(cb.try_acquire().is_err());

        cb.record_result(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 500);
        fail(&cb);
        fail(&cb);
        tokio::time::advance(Duration::from_millis(500)).await;

        cb.try_acquire().unwrap();
        cb.record_result(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());

        let stats = cb.stats();
        assert_eq!(stats.total_failures, 3);
        assert!((stats.failure_rate() - 1.0).abs() < f64::EPSILON);
    }
}
