//! Shard (liquidity pool) state

use crate::address::{Address, ChainId};
use crate::fixed_point::CurveScalar;
use crate::token::Token;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Inactive,
    Paused,
}

/// Sharded-AMM curve parameters, all scaled by 10^6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurveParams {
    pub beta1: CurveScalar,
    pub rmin: CurveScalar,
    pub rmax: CurveScalar,
    /// Maximum fraction of the input-token reserve a single trade may consume
    pub c: CurveScalar,
}

impl CurveParams {
    /// Parameters with only the c-bound set, used when a pool exposes no curve data
    pub fn with_c(c: CurveScalar) -> Self {
        Self {
            c,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// LP swap fee in basis points (30 = 0.3%)
    pub swap_fee_bps: u32,
    /// Protocol cut in basis points, charged on top of the swap fee
    pub protocol_fee_bps: u32,
}

impl FeeSchedule {
    pub fn total_bps(&self) -> u32 {
        self.swap_fee_bps + self.protocol_fee_bps
    }

    /// Fee charged on `amount` under this schedule, rounded down
    pub fn fee_on(&self, amount: u128) -> u128 {
        amount.saturating_mul(self.total_bps() as u128) / 10_000
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            swap_fee_bps: 30,
            protocol_fee_bps: 0,
        }
    }
}

/// Raw pool state as returned by the pool endpoint, before token resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStateSnapshot {
    pub token_a: Address,
    pub token_b: Address,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub total_supply: u128,
    pub fee_schedule: FeeSchedule,
    pub paused: bool,
}

/// One shard's observed state.
///
/// Owned by the shard registry; everything handed to callers is a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// `"<chain_id>:<pool address>"`
    pub id: String,
    pub chain_id: ChainId,
    pub pool_address: Address,
    pub token_a: Token,
    pub token_b: Token,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub total_supply: u128,
    pub curve_params: CurveParams,
    pub fee_schedule: FeeSchedule,
    pub status: ShardStatus,
    /// Wall-clock time of the fetch that produced this snapshot
    pub last_sync_ms: u64,
}

impl ShardInfo {
    pub fn make_id(chain_id: ChainId, pool_address: &Address) -> String {
        format!("{}:{}", chain_id, pool_address.to_hex())
    }

    /// Reserve of `token` in this shard, `None` if the shard does not hold it
    pub fn reserve_of(&self, token: &Address) -> Option<u128> {
        if self.token_a.address == *token {
            Some(self.reserve_a)
        } else if self.token_b.address == *token {
            Some(self.reserve_b)
        } else {
            None
        }
    }

    /// Reserve on the opposite side of `token`
    pub fn counter_reserve(&self, token: &Address) -> Option<u128> {
        if self.token_a.address == *token {
            Some(self.reserve_b)
        } else if self.token_b.address == *token {
            Some(self.reserve_a)
        } else {
            None
        }
    }

    /// Token on the opposite side of `token`
    pub fn counter_token(&self, token: &Address) -> Option<&Token> {
        if self.token_a.address == *token {
            Some(&self.token_b)
        } else if self.token_b.address == *token {
            Some(&self.token_a)
        } else {
            None
        }
    }

    /// Whether this shard trades exactly the two given tokens, in either order
    pub fn serves(&self, a: &Address, b: &Address) -> bool {
        (self.token_a.address == *a && self.token_b.address == *b)
            || (self.token_a.address == *b && self.token_b.address == *a)
    }

    pub fn is_active(&self) -> bool {
        self.status == ShardStatus::Active
    }

    /// Smaller of the two reserves, the quantity compared against the liquidity floor
    pub fn min_reserve(&self) -> u128 {
        self.reserve_a.min(self.reserve_b)
    }
}
