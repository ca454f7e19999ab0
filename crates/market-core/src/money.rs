//! Amounts of money and the points-to-money rate.
//!
//! Everything is held in integer minor units (satang, cents). A rate of
//! 0.10 per point is stored as `10`, so 600 points are worth exactly
//! `6000` minor units with no rounding step anywhere in a checkout.
//!
//! ## Usage
//! ```rust
//! use market_core::money::Money;
//!
//! let price = Money::from_cents(2500); // 25.00
//! let line = price * 3i64;             // 75.00
//! assert_eq!(line.cents(), 7500);
//! assert_eq!("25.00".parse::<Money>().unwrap(), price);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// A signed amount in minor currency units.
///
/// Signed so that intermediate differences (subtotal minus discount) can be
/// expressed; stored amounts are never negative.
///
/// ```text
/// variant price ─► cart line (live) ─► subtotal ─┬─► total = subtotal - discount
///                       PointsRate::value_of ────┘    (discount capped at subtotal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use market_core::money::Money;
    ///
    /// let price = Money::from_cents(4500); // 45.00
    /// assert_eq!(price.cents(), 4500);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion (truncated toward zero).
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use market_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(2000);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 6000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Scales by a ratio expressed in basis points, rounding half up.
    ///
    /// Used by the seed data to derive package prices from a base price
    /// (e.g. 18000 bps = ×1.8).
    pub fn scale_bps(&self, bps: u32) -> Money {
        let scaled = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(scaled as i64)
    }

    /// Formats the amount followed by a currency code, e.g. `40.00 THB`.
    pub fn with_currency(&self, code: &str) -> String {
        format!("{} {}", self, code)
    }
}

/// Display shows the plain decimal amount (`-5.50`, `40.00`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

/// Parses decimal amounts with at most two fractional digits.
impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_minor_units("amount", s).map(Money::from_cents)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Points Rate
// =============================================================================

/// Conversion factor from loyalty points to money.
///
/// Stored as minor currency units per point. The storefront configures it as
/// a two-decimal currency amount, so `0.10` per point is exactly 10 minor
/// units and no precision is lost.
///
/// ```rust
/// use market_core::money::{Money, PointsRate};
///
/// let rate: PointsRate = "0.10".parse().unwrap();
/// assert_eq!(rate.minor_per_point(), 10);
/// assert_eq!(rate.value_of(100), Money::from_cents(1000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsRate(i64);

impl PointsRate {
    /// Creates a rate from minor units per point.
    #[inline]
    pub const fn from_minor_per_point(minor: i64) -> Self {
        PointsRate(minor)
    }

    /// Returns the rate in minor units per point.
    #[inline]
    pub const fn minor_per_point(&self) -> i64 {
        self.0
    }

    /// Monetary value of `points` at this rate.
    pub fn value_of(&self, points: i64) -> Money {
        let value = points as i128 * self.0 as i128;
        Money::from_cents(value.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Points discount for a redemption: `min(points × rate, subtotal)`.
    ///
    /// Never negative, never above the subtotal. Excess requested redemption
    /// is capped rather than rejected.
    pub fn capped_discount(&self, points: i64, subtotal: Money) -> Money {
        if points <= 0 || !subtotal.is_positive() {
            return Money::zero();
        }
        self.value_of(points).max(Money::zero()).min(subtotal)
    }

    /// Largest number of points whose value does not exceed `amount`
    /// (`floor(amount / rate)`). A zero rate makes points worthless.
    pub fn points_covering(&self, amount: Money) -> i64 {
        if self.0 <= 0 || amount.cents() <= 0 {
            return 0;
        }
        amount.cents() / self.0
    }
}

impl Default for PointsRate {
    fn default() -> Self {
        PointsRate(crate::DEFAULT_POINTS_RATE_MINOR)
    }
}

impl fmt::Display for PointsRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Money::from_cents(self.0))
    }
}

impl FromStr for PointsRate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minor = parse_minor_units("points_to_currency_rate", s)?;
        if minor < 0 {
            return Err(ValidationError::OutOfRange {
                field: "points_to_currency_rate".to_string(),
                min: 0,
                max: i64::MAX,
            });
        }
        Ok(PointsRate(minor))
    }
}

// =============================================================================
// Decimal Parsing
// =============================================================================

/// Parses `"12"`, `"12.5"`, `"-0.10"` into minor units (two decimals max).
fn parse_minor_units(field: &str, input: &str) -> Result<i64, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("must be a decimal number"));
    }
    if frac.len() > 2 {
        return Err(invalid("at most two decimal places"));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("must be a decimal number"));
    }

    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("value too large"))?
    };
    let frac_value: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| invalid("must be a decimal number"))? * 10,
        _ => frac.parse().map_err(|_| invalid("must be a decimal number"))?,
    };

    let minor = whole_value
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| invalid("value too large"))?;

    Ok(if negative { -minor } else { minor })
}

// =============================================================================
// Unit Tests
// =============================================================================
