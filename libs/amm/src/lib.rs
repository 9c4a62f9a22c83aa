//! # Shard Router AMM Library - Threshold and Quote Mathematics
//!
//! ## Purpose
//!
//! Exact integer math behind shard validation: the c-threshold that caps how
//! much of a shard's input reserve one trade may consume, the ratio and
//! confidence derived from it, price impact, and the constant-product quote
//! model served by in-memory pools.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Shard reserves and curve parameters from the shard registry
//! - **Output Destinations**: Threshold validator, routing coordinator, memory pool endpoint
//! - **Precision**: Raw `u128` base units, curve scalars fixed-point at 10^6,
//!   ratios as `Decimal` (no floating point anywhere in a routing decision)
//!
//! ## Architecture Role
//!
//! ```text
//! ShardInfo.reserve_in ──┐
//!                        ├─→ threshold::check ─→ {is_valid, threshold, ratio}
//! CurveParams.c ─────────┘                              │
//!                                                       ↓
//!                                   confidence_score / price_impact_bps
//! ```

pub mod threshold;
pub mod v2_math;

pub use threshold::{
    c_threshold, check, confidence_score, price_impact, price_impact_bps, ratio_decimal,
    ThresholdCheck,
};
pub use v2_math::{V2Math, V2PoolState};

pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;

use thiserror::Error;

/// Quote math failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmmError {
    #[error("Amount must be positive")]
    ZeroAmount,

    #[error("Reserves must be positive")]
    EmptyReserves,

    #[error("Insufficient liquidity: requested {requested}, reserve {available}")]
    InsufficientLiquidity { requested: u128, available: u128 },

    #[error("Fee of {fee_bps} bps leaves nothing to trade")]
    InvalidFee { fee_bps: u32 },

    #[error("Arithmetic overflow")]
    Overflow,
}
