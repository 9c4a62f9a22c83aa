//! Fixed-point curve scalars
//!
//! Dimensionless curve parameters (beta1, rmin, rmax, c) are stored as integers
//! scaled by 10^6 so threshold arithmetic never touches floating point.
//!
//! Examples:
//! - 0.0104 = CurveScalar(10_400)
//! - 1.0    = CurveScalar(1_000_000)

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CurveScalar(pub u64);

impl CurveScalar {
    /// Scale factor for 6 decimal places
    pub const SCALE: u64 = 1_000_000;

    pub const ZERO: Self = Self(0);

    pub const ONE: Self = Self(Self::SCALE);

    /// Convert an exact decimal, truncating digits beyond the sixth place.
    ///
    /// Returns `None` for negative values or values that overflow the scaled range.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let scaled = (value * Decimal::from(Self::SCALE)).trunc();
        scaled.to_u64().map(Self)
    }

    /// Parse a decimal string such as `"0.0104"`
    pub fn from_decimal_str(input: &str) -> Option<Self> {
        input.trim().parse::<Decimal>().ok().and_then(Self::from_decimal)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::SCALE)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CurveScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal().normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exact_scaling() {
        assert_eq!(CurveScalar::from_decimal(dec!(0.0104)), Some(CurveScalar(10_400)));
        assert_eq!(CurveScalar::from_decimal_str("1"), Some(CurveScalar::ONE));
        assert_eq!(CurveScalar(10_400).to_decimal(), dec!(0.0104));
    }

    #[test]
    fn test_truncates_past_sixth_place() {
        assert_eq!(
            CurveScalar::from_decimal(dec!(0.0000019)),
            Some(CurveScalar(1))
        );
    }

    #[test]
    fn test_rejects_negative() {
        assert_eq!(CurveScalar::from_decimal(dec!(-0.5)), None);
        assert_eq!(CurveScalar::from_decimal_str("abc"), None);
    }

    #[test]
    fn test_display_is_normalized() {
        assert_eq!(CurveScalar(10_400).to_string(), "0.0104");
    }
}
