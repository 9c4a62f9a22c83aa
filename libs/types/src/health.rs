//! Chain health snapshots and breaker state

use crate::address::ChainId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of recent error strings kept per chain
pub const MAX_HEALTH_ERRORS: usize = 10;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Chain is failing - calls are rejected without being attempted
    Open,
    /// Recovery timeout elapsed - the next call is a trial
    HalfOpen,
}

impl CircuitState {
    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitState::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open)
    }

    pub fn is_half_open(&self) -> bool {
        matches!(self, CircuitState::HalfOpen)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainHealth {
    pub chain_id: ChainId,
    pub is_healthy: bool,
    pub block_height: Option<u64>,
    /// Wall-clock time at which `block_height` was last seen to advance
    pub last_block_time_ms: Option<u64>,
    pub rpc_latency_ms: Option<u64>,
    pub breaker_state: CircuitState,
    /// Most recent first, at most [`MAX_HEALTH_ERRORS`]
    pub errors: VecDeque<String>,
    pub last_checked_ms: u64,
}

impl ChainHealth {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            is_healthy: true,
            block_height: None,
            last_block_time_ms: None,
            rpc_latency_ms: None,
            breaker_state: CircuitState::Closed,
            errors: VecDeque::with_capacity(MAX_HEALTH_ERRORS),
            last_checked_ms: 0,
        }
    }

    /// Record an error at the front, dropping the oldest beyond the cap
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push_front(error.into());
        self.errors.truncate(MAX_HEALTH_ERRORS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_ring_newest_first() {
        let mut health = ChainHealth::new(1);
        for i in 0..15 {
            health.push_error(format!("error {}", i));
        }
        assert_eq!(health.errors.len(), MAX_HEALTH_ERRORS);
        assert_eq!(health.errors.front().map(String::as_str), Some("error 14"));
        assert_eq!(health.errors.back().map(String::as_str), Some("error 5"));
    }
}
