//! # Chain Isolation - Per-Chain Contexts and Failure Isolation
//!
//! ## Purpose
//!
//! Lets one chain degrade without affecting any other. Each registered chain
//! owns a [`ChainContext`] (chain-local state, TTL cache, request metrics) and
//! a [`CircuitBreaker`] with its own call timeout. Neither is ever shared.
//!
//! ## Integration Points
//!
//! - **Engine**: creates both on `add_chain`, destroys both on `remove_chain`
//! - **Every chain-scoped call**: wrapped by [`FailureIsolation::run_isolated`]
//! - **Health monitor**: reads breaker state per chain
//! - **Pathfinder**: caches multi-hop results in the chain's context cache
//!
//! ## Architecture Role
//!
//! ```text
//!   caller ──→ run_isolated(chain) ──→ breaker admits? ──no──→ ServiceUnavailable
//!                                          │ yes
//!                                          ↓
//!                              tokio::time::timeout(op) ──expired──→ Timeout
//!                                          │
//!                                          ↓
//!                      record success / chain failure on that chain only
//! ```
//!
//! Live services are held in a [`ServiceRegistry`] and indexed from contexts
//! by [`ServiceId`], so [`ContextManager::verify_integrity`] is a flat scan.

pub mod circuit_breaker;
pub mod context;
pub mod failure;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, Rejected};
pub use context::{
    is_reserved_key, ChainContext, ContextManager, ContextMetrics, IntegrityReport, ServiceId,
    ServiceRegistry, RESERVED_KEYS,
};
pub use failure::{FailureIsolation, IsolationCounters, IsolationPolicy};
