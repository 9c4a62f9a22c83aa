//! Threshold Validator
//!
//! A shard accepts a trade only while `amount_out ≤ floor(reserve_in × c)`.
//! The slippage check is computed separately and never tightens the bound;
//! the coordinator decides whether to enforce it.

use types::{Address, Decimal, ShardInfo, SlippageCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub threshold: u128,
    /// `amount_out / threshold`, `None` for a zero threshold
    pub ratio: Option<Decimal>,
}

/// Check `amount_out` against the shard's c-threshold for input `token_in`.
///
/// A shard that does not hold `token_in` has no reserve to trade against and
/// is never valid.
pub fn validate(shard: &ShardInfo, amount_out: u128, token_in: &Address) -> Validation {
    let reserve_in = shard.reserve_of(token_in).unwrap_or(0);
    let check = amm::check(amount_out, reserve_in, shard.curve_params.c);
    Validation {
        is_valid: check.is_valid,
        threshold: check.threshold,
        ratio: check.ratio,
    }
}

/// Price impact of taking `amount_out` from the output side, against `tolerance_bps`
pub fn check_slippage(shard: &ShardInfo, amount_out: u128, token_in: &Address, tolerance_bps: u32) -> SlippageCheck {
    let reserve_out = shard.counter_reserve(token_in).unwrap_or(0);
    let price_impact_bps = amm::price_impact_bps(amount_out, reserve_out);
    SlippageCheck {
        tolerance_bps,
        price_impact_bps,
        passed: price_impact_bps <= tolerance_bps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::{CurveParams, CurveScalar, FeeSchedule, ShardStatus, Token};

    const USDC: Address = Address([0x01; 20]);
    const USDT: Address = Address([0x02; 20]);

    fn shard(reserve_usdc: u128, reserve_usdt: u128) -> ShardInfo {
        let pool = Address([0xa1; 20]);
        ShardInfo {
            id: ShardInfo::make_id(137, &pool),
            chain_id: 137,
            pool_address: pool,
            token_a: Token::new(137, USDC, "USDC", 6),
            token_b: Token::new(137, USDT, "USDT", 6),
            reserve_a: reserve_usdc,
            reserve_b: reserve_usdt,
            total_supply: 1_000,
            curve_params: CurveParams::with_c(CurveScalar(10_400)),
            fee_schedule: FeeSchedule::default(),
            status: ShardStatus::Active,
            last_sync_ms: 0,
        }
    }

    #[test]
    fn test_bound_uses_input_side_reserve() {
        let s = shard(50_000, 120_000);
        let ok = validate(&s, 400, &USDC);
        assert!(ok.is_valid);
        assert_eq!(ok.threshold, 520);

        let rejected = validate(&s, 600, &USDC);
        assert!(!rejected.is_valid);

        // reversed direction trades against the USDT reserve
        assert_eq!(validate(&s, 600, &USDT).threshold, 1_248);
        assert!(validate(&s, 600, &USDT).is_valid);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let s = shard(50_000, 50_000);
        assert!(validate(&s, 520, &USDC).is_valid);
        assert!(!validate(&s, 521, &USDC).is_valid);
        assert_eq!(validate(&s, 520, &USDC).ratio, Some(dec!(1)));
    }

    #[test]
    fn test_foreign_token_is_never_valid() {
        let s = shard(50_000, 50_000);
        let v = validate(&s, 1, &Address([9; 20]));
        assert!(!v.is_valid);
        assert_eq!(v.ratio, None);
    }

    #[test]
    fn test_slippage_is_independent_of_threshold() {
        let s = shard(50_000, 50_000);
        // 400 of 50,000 = 80 bps: inside the c-bound but over a 50 bps tolerance
        let check = check_slippage(&s, 400, &USDC, 50);
        assert_eq!(check.price_impact_bps, 80);
        assert!(!check.passed);
        assert!(validate(&s, 400, &USDC).is_valid);
        assert!(check_slippage(&s, 400, &USDC, 100).passed);
    }
}
