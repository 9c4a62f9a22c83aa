//! # Shard Router - Smallest-Shard Routing for Sharded AMMs
//!
//! ## Purpose
//!
//! Routes exact-output trades to one of several liquidity pools ("shards")
//! serving the same token pair. The router prefers the shard holding the least
//! of the input token, escalates to larger shards only when the trade would
//! breach the c-threshold (`amount_out ≤ reserve_in × c`), and composes
//! two-hop paths through hub tokens when a pair has no direct shard.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Factory and pair contracts through a [`PoolEndpoint`]
//!   (JSON-RPC via `web3`, or in-memory for tests and simulation)
//! - **Output Destinations**: [`RoutingDecision`](types::RoutingDecision)s and
//!   [`PathResult`](types::PathResult)s to the API layer, trade submissions
//!   back through the endpoint, [`RouterEvent`](types::RouterEvent)s to the sink
//! - **Isolation**: Per-chain circuit breaker and context from `isolation`
//! - **Health**: Per-chain liveness from `health-check`
//!
//! ## Architecture Role
//!
//! ```text
//!                  ┌────────────────────── ShardRouterEngine ──────────────────────┐
//!                  │                                                              │
//!  API layer ───→  │  RoutingCoordinator ──→ selector ──→ validator               │
//!                  │         │                                                    │
//!                  │  Pathfinder (hubs) ──→ coordinator (per hop)                 │
//!                  │         │                                                    │
//!                  │  ShardRegistry (TTL cache, batched refresh) ──→ PoolEndpoint │
//!                  └──────────────────────────────────────────────────────────────┘
//!                              one instance set per chain, nothing shared
//! ```
//!
//! ## Module Organization
//!
//! - [`registry`]: discovery, age-bounded shard cache, liquidity-floor eviction
//! - [`selector`]: smallest-shard rule with uniform tie-break
//! - [`validator`]: c-threshold bound and independent slippage check
//! - [`coordinator`]: find-route with escalation, route cache, statistics, execution
//! - [`pathfinder`]: direct or hub-mediated two-hop paths, exact input or output
//! - [`engine`]: multi-chain composition, hub fallback, event forwarding, isolation wiring
//! - [`logging`]: stage markers for log lines and sink events
//! - [`endpoint`]: the pool endpoint boundary and its implementations

#[macro_use]
pub mod logging;

pub mod coordinator;
pub mod endpoint;
pub mod engine;
pub mod pathfinder;
pub mod registry;
pub mod selector;
pub mod validator;

pub use coordinator::{CoordinatorConfig, RoutingCoordinator, TradeSize};
pub use endpoint::{demo_tokens, EndpointProbe, MemoryPool, MemoryPoolEndpoint, PoolEndpoint, Web3PoolEndpoint};
pub use engine::{ChainMetrics, ChainService, ShardRouterEngine};
pub use logging::{log_event, Marker};
pub use pathfinder::{Pathfinder, PathfinderConfig};
pub use registry::{RefreshReport, RegistryConfig, RegistryStats, ShardRegistry};
pub use selector::Selection;
pub use validator::Validation;
