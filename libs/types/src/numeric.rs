//! Fixed-point price and size types
//!
//! Venues publish prices as scaled integers; the scale is a property of the
//! instrument, not of the price, so it is supplied at conversion time.
//! Sizes stay floating point as received.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantity at a price level or on a trade.
pub type Size = f64;

/// Fixed-point price as an integer number of ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    pub const ZERO: Price = Price(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Exact decimal value for an instrument quoted with `scale` decimals.
    ///
    /// Scales above 28 are clamped to the maximum `Decimal` supports.
    pub fn to_decimal(&self, scale: u32) -> Decimal {
        Decimal::new(self.0, scale.min(28))
    }

    /// Build a fixed-point price from a decimal, rounding extra digits.
    ///
    /// Returns `None` when the value does not fit in an `i64`.
    pub fn from_decimal(value: Decimal, scale: u32) -> Option<Self> {
        let mut scaled = value;
        scaled.rescale(scale.min(28));
        let mantissa = scaled.mantissa();
        i64::try_from(mantissa).ok().map(Self)
    }
}

impl From<i64> for Price {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
