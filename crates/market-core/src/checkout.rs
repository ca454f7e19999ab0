//! # Checkout Calculation
//!
//! Pure pricing for one checkout: frozen subtotal, capped points discount,
//! amount due and points earned.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  cart lines (catalog price read NOW, then frozen)                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  subtotal = Σ unit_price × quantity                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  discount = min(points_to_redeem × rate, subtotal)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  total    = subtotal − discount              (never negative)          │
//! │  earned   = Σ points_per_unit × quantity     (independent of discount) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The balance check compares the *requested* redemption with the balance
//! before any capping, so asking for more points than the account holds is
//! always an error even when the cap would have reduced the discount.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, PointsRate};
use crate::types::PricedCartLine;
use crate::validation::validate_points_to_redeem;

/// One priced line of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub variant_id: String,
    pub name: String,
    /// Catalog price at the moment the quote was taken.
    pub unit_price: Money,
    pub quantity: i64,
    pub points_per_unit: i64,
}

impl QuoteLine {
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }

    #[inline]
    pub fn points(&self) -> i64 {
        self.points_per_unit * self.quantity
    }
}

impl From<&PricedCartLine> for QuoteLine {
    fn from(line: &PricedCartLine) -> Self {
        QuoteLine {
            variant_id: line.variant.variant_id.clone(),
            name: line.variant.product_name.clone(),
            unit_price: line.variant.unit_price(),
            quantity: line.quantity,
            points_per_unit: line.variant.points_per_unit,
        }
    }
}

/// The full price breakdown of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutQuote {
    pub lines: Vec<QuoteLine>,
    pub subtotal: Money,
    /// Points the customer asked to redeem (debited in full).
    pub points_redeemed: i64,
    pub discount: Money,
    pub total: Money,
    pub points_earned: i64,
    pub rate: PointsRate,
}

impl CheckoutQuote {
    /// Prices a checkout.
    ///
    /// ## Errors
    /// - `EmptyCart` when `lines` is empty
    /// - `InvalidAmount` when `points_to_redeem` is negative
    ///
    /// ## Example
    /// ```rust
    /// use market_core::{CheckoutQuote, Money, PointsRate, QuoteLine};
    ///
    /// let lines = vec![QuoteLine {
    ///     variant_id: "v1".into(),
    ///     name: "Spinach".into(),
    ///     unit_price: Money::from_cents(2500),
    ///     quantity: 2,
    ///     points_per_unit: 5,
    /// }];
    /// let quote = CheckoutQuote::compute(lines, PointsRate::from_minor_per_point(10), 100).unwrap();
    /// assert_eq!(quote.discount, Money::from_cents(1000));
    /// assert_eq!(quote.total, Money::from_cents(4000));
    /// assert_eq!(quote.points_earned, 10);
    /// ```
    pub fn compute(
        lines: Vec<QuoteLine>,
        rate: PointsRate,
        points_to_redeem: i64,
    ) -> CoreResult<Self> {
        if lines.is_empty() {
            return Err(CoreError::EmptyCart);
        }
        validate_points_to_redeem(points_to_redeem)?;

        let subtotal: Money = lines.iter().map(QuoteLine::line_total).sum();
        let discount = rate.capped_discount(points_to_redeem, subtotal);
        let total = subtotal - discount;
        let points_earned = lines.iter().map(QuoteLine::points).sum();

        Ok(CheckoutQuote {
            lines,
            subtotal,
            points_redeemed: points_to_redeem,
            discount,
            total,
            points_earned,
            rate,
        })
    }

    /// Rejects a redemption larger than `balance`.
    pub fn ensure_covered_by(&self, account_id: &str, balance: i64) -> CoreResult<()> {
        if self.points_redeemed > balance {
            return Err(CoreError::InsufficientBalance {
                account_id: account_id.to_string(),
                balance,
                requested: self.points_redeemed,
            });
        }
        Ok(())
    }

    /// Points requested beyond what the discount could use.
    pub fn unused_points(&self) -> i64 {
        let useful = self.rate.points_covering(self.subtotal);
        (self.points_redeemed - useful).max(0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
