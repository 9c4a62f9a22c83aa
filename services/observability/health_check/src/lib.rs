//! # Shard Router Health Check System
//!
//! Per-chain health monitoring with support for:
//! - Block height liveness and staleness detection
//! - RPC round-trip latency tracking
//! - Sub-service health probes through an explicit capability trait
//! - Circuit breaker state reporting
//!
//! ## Architecture
//!
//! Each registered chain runs its own interval task. A round reads the block
//! height through the chain's failure isolation wrapper, runs every
//! sub-service check outside the breaker, and folds the results into a
//! [`ChainHealth`](types::ChainHealth):
//!
//! ```text
//! is_healthy = block height advancing ∧ no sub-service errors ∧ breaker not open
//! ```
//!
//! The last 10 error strings are kept per chain, newest first. Every round is
//! published as a `HealthUpdated` event.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use health_check::{HealthMonitor, MonitorConfig};
//! # use std::sync::Arc;
//! # fn demo(probe: Arc<dyn health_check::ChainProbe>) {
//! let isolation = Arc::new(isolation::FailureIsolation::new());
//! let monitor = HealthMonitor::new(isolation, types::EventEmitter::disconnected());
//! monitor.start(137, MonitorConfig::from(&router_config::HealthSettings::default()), probe, vec![]);
//! # }
//! ```

pub mod monitor;
pub mod probe;

pub use monitor::{HealthMonitor, HealthStatus, HealthSummary, MonitorConfig};
pub use probe::{ChainProbe, HealthProbe, MonitoredService};
