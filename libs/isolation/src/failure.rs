//! Failure isolation: one breaker and one timeout per chain
//!
//! Every chain-scoped operation goes through [`FailureIsolation::run_isolated`].
//! A chain that is down is cut off by its own breaker and cannot consume
//! time or retry budget belonging to its siblings.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use types::{ChainId, CircuitState, RouterError};

/// Per-chain isolation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPolicy {
    pub breaker: CircuitBreakerConfig,
    /// Applied to every wrapped call
    pub timeout: Duration,
}

impl From<&router_config::CircuitBreakerSettings> for IsolationPolicy {
    fn from(settings: &router_config::CircuitBreakerSettings) -> Self {
        Self {
            breaker: CircuitBreakerConfig::from(settings),
            timeout: settings.timeout(),
        }
    }
}

/// Per-chain call counters, never aggregated across chains
#[derive(Debug, Default)]
struct ChainCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationCounters {
    pub calls: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct ChainGuard {
    breaker: CircuitBreaker,
    timeout: Duration,
    counters: ChainCounters,
}

/// Records a failure if the wrapped future is dropped before completing,
/// so an abandoned half-open trial never wedges the breaker.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool) {
        self.breaker.record_result(success);
        self.settled = true;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_result(false);
        }
    }
}

#[derive(Debug, Default)]
pub struct FailureIsolation {
    chains: DashMap<ChainId, Arc<ChainGuard>>,
}

impl FailureIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the breaker for a chain
    pub fn register(&self, chain_id: ChainId, policy: IsolationPolicy) {
        let guard = ChainGuard {
            breaker: CircuitBreaker::new(chain_id, policy.breaker),
            timeout: policy.timeout,
            counters: ChainCounters::default(),
        };
        if self.chains.insert(chain_id, Arc::new(guard)).is_some() {
            debug!(chain_id, "Replaced failure isolation state");
        }
    }

    pub fn unregister(&self, chain_id: ChainId) -> bool {
        self.chains.remove(&chain_id).is_some()
    }

    pub fn is_registered(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// Run `operation` against `chain_id` under that chain's breaker and timeout.
    ///
    /// - OPEN breaker: `ServiceUnavailable`, the future is never polled
    /// - Timeout: `Timeout`, counted as a failure
    /// - Errors count against the breaker only when [`RouterError::is_chain_failure`]
    pub async fn run_isolated<T, F>(
        &self,
        chain_id: ChainId,
        operation: &str,
        fut: F,
    ) -> Result<T, RouterError>
    where
        F: Future<Output = Result<T, RouterError>>,
    {
        let guard = self
            .chains
            .get(&chain_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RouterError::configuration(
                    Some("chain_id"),
                    format!("chain {} is not registered", chain_id),
                )
            })?;

        guard.counters.calls.fetch_add(1, Ordering::Relaxed);

        if let Err(rejected) = guard.breaker.try_acquire() {
            guard.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(chain_id, operation, "Rejected by open circuit breaker");
            return Err(RouterError::ServiceUnavailable {
                chain_id,
                retry_after_ms: rejected.retry_after.as_millis() as u64,
            });
        }

        let admission = Admission {
            breaker: &guard.breaker,
            settled: false,
        };

        let result = match tokio::time::timeout(guard.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                guard.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(chain_id, operation, timeout_ms = guard.timeout.as_millis() as u64, "Operation timed out");
                Err(RouterError::Timeout {
                    chain_id,
                    operation: operation.to_string(),
                    timeout_ms: guard.timeout.as_millis() as u64,
                })
            }
        };

        let chain_failure = matches!(&result, Err(e) if e.is_chain_failure());
        if chain_failure {
            guard.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        admission.settle(!chain_failure);

        result
    }

    pub fn state(&self, chain_id: ChainId) -> Option<CircuitState> {
        self.chains.get(&chain_id).map(|g| g.breaker.state())
    }

    pub fn stats(&self, chain_id: ChainId) -> Option<CircuitBreakerStats> {
        self.chains.get(&chain_id).map(|g| g.breaker.stats())
    }

    pub fn counters(&self, chain_id: ChainId) -> Option<IsolationCounters> {
        self.chains.get(&chain_id).map(|g| IsolationCounters {
            calls: g.counters.calls.load(Ordering::Relaxed),
            failures: g.counters.failures.load(Ordering::Relaxed),
            timeouts: g.counters.timeouts.load(Ordering::Relaxed),
            rejected: g.counters.rejected.load(Ordering::Relaxed),
        })
    }
}
