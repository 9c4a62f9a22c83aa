//! c-threshold bound
//!
//! `threshold = floor(reserve_in × c)`, with `c` held as a 10^6-scaled integer
//! so the bound is exact and linear in the reserve. A trade of `amount_out` is
//! within the bound iff `amount_out ≤ threshold`.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use types::CurveScalar;

/// Largest mantissa a `Decimal` can hold (2^96 - 1)
const DECIMAL_MAX_MANTISSA: u128 = (1u128 << 96) - 1;

/// Outcome of checking one trade size against one shard's bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdCheck {
    pub is_valid: bool,
    pub threshold: u128,
    /// `amount_out / threshold`, `None` when the threshold is zero
    pub ratio: Option<Decimal>,
}

/// `floor(reserve_in × c)`, saturating at `u128::MAX`.
///
/// Splits the reserve at the scale boundary so the product never overflows
/// for any reserve a pool can actually hold.
pub fn c_threshold(reserve_in: u128, c: CurveScalar) -> u128 {
    let scale = CurveScalar::SCALE as u128;
    let c = c.raw() as u128;
    let whole = (reserve_in / scale).saturating_mul(c);
    let frac = (reserve_in % scale) * c / scale;
    whole.saturating_add(frac)
}

pub fn check(amount_out: u128, reserve_in: u128, c: CurveScalar) -> ThresholdCheck {
    let threshold = c_threshold(reserve_in, c);
    ThresholdCheck {
        is_valid: amount_out <= threshold,
        threshold,
        ratio: ratio_decimal(amount_out, threshold),
    }
}

/// `numerator / denominator` as a `Decimal`, `None` for a zero denominator.
///
/// Operands beyond the `Decimal` mantissa are shifted down together, which
/// keeps the quotient to within the precision a ratio needs.
pub fn ratio_decimal(numerator: u128, denominator: u128) -> Option<Decimal> {
    if denominator == 0 {
        return None;
    }
    let (mut n, mut d) = (numerator, denominator);
    while n > DECIMAL_MAX_MANTISSA || d > DECIMAL_MAX_MANTISSA {
        n >>= 1;
        d >>= 1;
    }
    if d == 0 {
        return None;
    }
    let n = Decimal::from_u128(n)?;
    let d = Decimal::from_u128(d)?;
    n.checked_div(d)
}

/// Headroom left under the bound: `clamp(1 − ratio, 0, 1)` at 4 dp.
///
/// A missing ratio (zero threshold) has no headroom.
pub fn confidence_score(ratio: Option<Decimal>) -> Decimal {
    match ratio {
        Some(ratio) => (dec!(1) - ratio)
            .max(Decimal::ZERO)
            .min(dec!(1))
            .round_dp(4),
        None => Decimal::ZERO,
    }
}

/// Fraction of the output reserve a trade removes, `amount_out / reserve_out`
pub fn price_impact(amount_out: u128, reserve_out: u128) -> Decimal {
    ratio_decimal(amount_out, reserve_out).unwrap_or(dec!(1))
}

/// Price impact in basis points, rounded to the nearest point and capped at `u32::MAX`
pub fn price_impact_bps(amount_out: u128, reserve_out: u128) -> u32 {
    use rust_decimal::prelude::ToPrimitive;
    (price_impact(amount_out, reserve_out) * dec!(10000))
        .round()
        .to_u32()
        .unwrap_or(u32::MAX)
}
