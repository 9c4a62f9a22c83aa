//! Constant-product (x*y=k) quote math in raw base units
//!
//! Integer arithmetic over `u128`, rounding in the pool's favour: outputs round
//! down, required inputs round up. This is the quote model the in-memory pool
//! endpoint serves; live pools answer quotes from their own router contract.

use crate::AmmError;
use rust_decimal::Decimal;

const BPS: u128 = 10_000;

/// Pool reserves and fee, oriented for one trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2PoolState {
    pub reserve_in: u128,
    pub reserve_out: u128,
    /// Total fee in basis points (30 = 0.3%)
    pub fee_bps: u32,
}

impl V2PoolState {
    pub fn output_for(&self, amount_in: u128) -> Result<u128, AmmError> {
        V2Math::calculate_output_amount(amount_in, self.reserve_in, self.reserve_out, self.fee_bps)
    }

    pub fn input_for(&self, amount_out: u128) -> Result<u128, AmmError> {
        V2Math::calculate_input_amount(amount_out, self.reserve_in, self.reserve_out, self.fee_bps)
    }
}

/// V2 AMM math functions
pub struct V2Math;

impl V2Math {
    /// Exact output for `amount_in`, after fee, rounded down
    pub fn calculate_output_amount(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: u32,
    ) -> Result<u128, AmmError> {
        if amount_in == 0 {
            return Err(AmmError::ZeroAmount);
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(AmmError::EmptyReserves);
        }
        let fee_multiplier = Self::fee_multiplier(fee_bps)?;

        let amount_in_with_fee = amount_in.checked_mul(fee_multiplier).ok_or(AmmError::Overflow)?;
        let numerator = amount_in_with_fee
            .checked_mul(reserve_out)
            .ok_or(AmmError::Overflow)?;
        let denominator = reserve_in
            .checked_mul(BPS)
            .and_then(|r| r.checked_add(amount_in_with_fee))
            .ok_or(AmmError::Overflow)?;

        Ok(numerator / denominator)
    }

    /// Input required to receive exactly `amount_out`, rounded up
    pub fn calculate_input_amount(
        amount_out: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: u32,
    ) -> Result<u128, AmmError> {
        if amount_out == 0 {
            return Err(AmmError::ZeroAmount);
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(AmmError::EmptyReserves);
        }
        if amount_out >= reserve_out {
            return Err(AmmError::InsufficientLiquidity {
                requested: amount_out,
                available: reserve_out,
            });
        }
        let fee_multiplier = Self::fee_multiplier(fee_bps)?;

        let numerator = reserve_in
            .checked_mul(amount_out)
            .and_then(|n| n.checked_mul(BPS))
            .ok_or(AmmError::Overflow)?;
        let denominator = (reserve_out - amount_out)
            .checked_mul(fee_multiplier)
            .ok_or(AmmError::Overflow)?;

        Ok(numerator / denominator + 1)
    }

    /// Fee charged on an input amount, rounded down
    pub fn fee_amount(amount_in: u128, fee_bps: u32) -> u128 {
        amount_in.saturating_mul(fee_bps as u128) / BPS
    }

    /// Spot-price movement caused by swapping `amount_in`, as a fraction (0.05 = 5%)
    pub fn calculate_price_impact(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
    ) -> Result<Decimal, AmmError> {
        let amount_out = Self::calculate_output_amount(amount_in, reserve_in, reserve_out, 0)?;
        let price_before = crate::threshold::ratio_decimal(reserve_out, reserve_in)
            .ok_or(AmmError::EmptyReserves)?;
        let price_after = crate::threshold::ratio_decimal(
            reserve_out - amount_out,
            reserve_in.checked_add(amount_in).ok_or(AmmError::Overflow)?,
        )
        .ok_or(AmmError::EmptyReserves)?;

        Ok((price_before - price_after).abs() / price_before)
    }

    fn fee_multiplier(fee_bps: u32) -> Result<u128, AmmError> {
        if fee_bps as u128 >= BPS {
            return Err(AmmError::InvalidFee { fee_bps });
        }
        Ok(BPS - fee_bps as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_v2_output_calculation() {
        // 100 in against 1000:2000 at 0.3% -> 181.32, rounded down
        let output = V2Math::calculate_output_amount(100, 1_000, 2_000, 30).unwrap();
        assert_eq!(output, 181);
    }

    #[test]
    fn test_input_covers_requested_output() {
        let amount_in = V2Math::calculate_input_amount(400, 50_000, 50_000, 30).unwrap();
        let amount_out = V2Math::calculate_output_amount(amount_in, 50_000, 50_000, 30).unwrap();
        assert!(amount_out >= 400);
        // One unit less must fall short
        let short = V2Math::calculate_output_amount(amount_in - 1, 50_000, 50_000, 30).unwrap();
        assert!(short < 400);
    }

    #[test]
    fn test_output_exceeding_reserve_rejected() {
        assert_eq!(
            V2Math::calculate_input_amount(2_000, 1_000, 2_000, 30),
            Err(AmmError::InsufficientLiquidity {
                requested: 2_000,
                available: 2_000
            })
        );
        assert_eq!(
            V2Math::calculate_output_amount(10, 1_000, 2_000, 10_000),
            Err(AmmError::InvalidFee { fee_bps: 10_000 })
        );
    }

    #[test]
    fn test_price_impact() {
        let impact = V2Math::calculate_price_impact(100, 1_000, 2_000).unwrap();
        assert!(impact > dec!(0));
        assert!(impact < dec!(0.2));
    }
}
