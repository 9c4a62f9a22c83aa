//! # Shard Router Types - Shared Data Model
//!
//! ## Purpose
//!
//! Single source of truth for the data that flows between the shard registry,
//! the routing coordinator, the isolation layer and the health monitor. Every
//! crate in the workspace speaks these types, so a snapshot handed out by the
//! registry can be cached by the coordinator, wrapped in an event and shipped to
//! an observability sink without conversion.
//!
//! ## Integration Points
//!
//! - **Producers**: Shard registry (ShardInfo), routing coordinator
//!   (RoutingDecision), health monitor (ChainHealth)
//! - **Consumers**: The excluded API layer, event sinks, tests
//! - **Error Taxonomy**: [`RouterError`] carries every failure kind the engine
//!   can surface, with the user-visible status mapping attached
//!
//! ## Architecture Role
//!
//! ```text
//! Pool Endpoint → [ShardInfo] → Selector/Validator → [RoutingDecision] → Caller
//!                      ↓                                   ↓
//!               [RouterEvent::Shard*]            [RouterEvent::RoutingCompleted]
//!                      └──────────────→ Event Sink ←───────┘
//! ```
//!
//! ## Amount Representation
//!
//! Token amounts and reserves are raw base units stored as `u128`, so the
//! non-negativity invariant on reserves holds by construction. Dimensionless
//! curve parameters are fixed-point integers scaled by 10^6 ([`CurveScalar`]).

pub mod address;
pub mod errors;
pub mod events;
pub mod fixed_point;
pub mod health;
pub mod routing;
pub mod shard;
pub mod token;

pub use address::{Address, ChainId};
pub use errors::{ErrorKind, RouterError, StatusHint};
pub use events::{EventEmitter, RouterEvent};
pub use fixed_point::CurveScalar;
pub use health::{ChainHealth, CircuitState, MAX_HEALTH_ERRORS};
pub use routing::{
    PathResult, PathStep, Quote, RouteOptions, RouteResult, RoutingDecision, RoutingStats,
    SlippageCheck, TradeExecutionResult, TradeRequest, TxReceipt,
};
pub use shard::{CurveParams, FeeSchedule, PoolStateSnapshot, ShardInfo, ShardStatus};
pub use token::{Token, TokenMetadata, TokenPair};

pub use rust_decimal::Decimal;

/// Wall-clock milliseconds since the Unix epoch, used for reporting fields only.
///
/// Staleness and timeouts are measured with monotonic clocks; this value is what
/// ends up in snapshots shipped to callers.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
