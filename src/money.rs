//! Fixed-point quantity representation.
//!
//! All stock quantities are stored as integers scaled by `10^6` so that
//! arithmetic never touches a binary float. A bare `f64` would drift under
//! repeated addition/subtraction across cost-layer consumption and balance
//! deltas; an integer scaled by a fixed power of ten does not.
//!
//! `ScaledQty` is unsigned (balances, reserved/allocated counters, cost
//! layer remaining quantities never go negative); `ScaledQtySigned` is used
//! for deltas, which can be negative (an `issue` movement line, a release
//! back to available).

use std::fmt;
use std::ops::Deref;

use once_cell::sync::Lazy;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal digits every stored quantity is rounded to.
pub const SCALE: u32 = 6;

/// Tolerance used for all quantity comparisons (`roundQuantity`'s epsilon of
/// `1e-6`), expressed in raw `10^6`-scaled units — one raw unit is exactly
/// the epsilon the specification names.
pub const EPSILON_RAW: i64 = 1;

static SCALE_MULTIPLIER: Lazy<Decimal> = Lazy::new(|| Decimal::from(10i64.pow(SCALE)));

fn scale_multiplier() -> Decimal {
    *SCALE_MULTIPLIER
}

/// An unsigned quantity scaled by `10^6`. Constructed only through
/// [`round_quantity`] or arithmetic on other `ScaledQty` values, never from
/// a raw integer literal, so every value in the system has passed through
/// the same rounding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaledQty(i64);

/// A signed quantity delta scaled by `10^6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaledQtySigned(i64);

#[derive(Debug, Error, Clone)]
pub enum MoneyError {
    #[error("quantity must be greater than zero")]
    NotPositive,
    #[error("quantity would overflow")]
    Overflow,
    #[error("invalid quantity format: {0}")]
    InvalidFormat(String),
}

impl ScaledQty {
    pub const ZERO: ScaledQty = ScaledQty(0);

    /// Wraps an already-scaled raw integer, e.g. a value read back from a
    /// `NUMERIC` column. Callers constructing a value from client input
    /// should go through [`round_quantity`] instead, so the epsilon rule is
    /// applied exactly once per value's lifetime.
    #[inline]
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw `10^6`-scaled integer, the representation stored in Postgres
    /// `NUMERIC` columns (via `rust_decimal`) and compared bit-for-bit.
    #[inline]
    pub fn raw(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Saturating subtraction that clamps to zero instead of going
    /// negative — `applyDelta`'s "clamp to zero on write" rule.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }

    pub fn to_signed(self) -> ScaledQtySigned {
        ScaledQtySigned(self.0)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / scale_multiplier()
    }

    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

impl ScaledQtySigned {
    pub const ZERO: ScaledQtySigned = ScaledQtySigned(0);

    #[inline]
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> ScaledQty {
        ScaledQty(self.0.abs())
    }

    pub fn negate(self) -> Self {
        Self(-self.0)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / scale_multiplier()
    }
}

impl From<ScaledQty> for ScaledQtySigned {
    fn from(v: ScaledQty) -> Self {
        Self(v.0)
    }
}

impl Deref for ScaledQty {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for ScaledQtySigned {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ScaledQty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl fmt::Display for ScaledQtySigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// `roundQuantity(x) = round(x * 10^6) / 10^6`, applied at the moment a
/// client-facing `Decimal` enters the system. Rejects non-positive input —
/// callers that need zero/negative deltas use [`round_quantity_signed`].
pub fn round_quantity(x: Decimal) -> Result<ScaledQty, MoneyError> {
    if x.is_sign_negative() || x.is_zero() {
        return Err(MoneyError::NotPositive);
    }
    let scaled = (x * scale_multiplier())
        .round()
        .to_i64()
        .ok_or(MoneyError::Overflow)?;
    Ok(ScaledQty(scaled))
}

/// Signed counterpart of [`round_quantity`] for deltas (movement lines,
/// adjustments) which are legitimately negative or zero.
pub fn round_quantity_signed(x: Decimal) -> Result<ScaledQtySigned, MoneyError> {
    let scaled = (x * scale_multiplier())
        .round()
        .to_i64()
        .ok_or(MoneyError::Overflow)?;
    Ok(ScaledQtySigned(scaled))
}

/// Parses a client-facing decimal string straight to a `ScaledQty`,
/// rejecting more than [`SCALE`] fractional digits rather than truncating
/// silently.
pub fn parse_quantity(s: &str) -> Result<ScaledQty, MoneyError> {
    let d = Decimal::from_str(s.trim())
        .map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    if d.scale() > SCALE {
        return Err(MoneyError::InvalidFormat(format!(
            "too many decimal places: {} (max {})",
            d.scale(),
            SCALE
        )));
    }
    round_quantity(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_quantity_scales_to_six_decimals() {
        let q = round_quantity(Decimal::from_str("0.25").unwrap()).unwrap();
        assert_eq!(q.raw(), 250_000);
    }

    #[test]
    fn round_quantity_rejects_zero_and_negative() {
        assert!(round_quantity(Decimal::ZERO).is_err());
        assert!(round_quantity(Decimal::from_str("-1").unwrap()).is_err());
    }

    #[test]
    fn saturating_sub_clamps_to_zero() {
        let a = ScaledQty(100);
        let b = ScaledQty(150);
        assert_eq!(a.saturating_sub(b), ScaledQty::ZERO);
    }

    #[test]
    fn parse_quantity_rejects_excess_precision() {
        assert!(parse_quantity("1.0000001").is_err());
        assert!(parse_quantity("1.000001").is_ok());
    }

    #[test]
    fn signed_abs_and_negate() {
        let d = ScaledQtySigned(-500_000);
        assert_eq!(d.abs(), ScaledQty(500_000));
        assert_eq!(d.negate().raw(), 500_000);
    }
}
