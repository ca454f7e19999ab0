//! # Domain Types
//!
//! Accounts, the points ledger, carts, the catalog, orders and the store
//! settings row.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Account      │   │   LedgerEntry   │   │    CartLine     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  account_id     │   │  account_id     │       │
//! │  │  points         │   │  delta (signed) │   │  variant_id     │       │
//! │  │  referral_code  │   │  kind           │   │  quantity       │       │
//! │  │  referred_by    │   │  reason         │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Order       │   │   OrderLine     │   │  OrderStatus    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  order_number   │◄──│  order_id       │   │  Pending        │       │
//! │  │  total_amount   │   │  unit_price     │   │  Processing     │       │
//! │  │  points_redeemed│   │  (frozen)       │   │  Shipped        │       │
//! │  │  artifact_ref   │   │  quantity       │   │  Delivered      │       │
//! │  └─────────────────┘   └─────────────────┘   │  Cancelled      │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are joined on their UUID `id`. People see the short codes instead:
//! `member_number`, `referral_code` and `order_number`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::{Money, PointsRate};

// =============================================================================
// Account
// =============================================================================

/// A storefront customer with a loyalty-point balance.
///
/// `points` always equals the sum of the account's ledger deltas; both are
/// only ever changed together inside one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Account {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Subject reference supplied by the identity provider.
    pub external_ref: String,

    /// Human-readable member number (8 chars).
    pub member_number: String,

    pub phone_number: Option<String>,

    pub address: Option<String>,

    /// Current point balance (never negative).
    pub points: i64,

    /// Token other customers use to register with a referral (6 chars).
    pub referral_code: String,

    /// Account that referred this one, recorded at most once.
    pub referred_by: Option<String>,

    /// Incremented on every balance change.
    pub version: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for account registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub external_ref: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

impl NewAccount {
    /// Creates registration input for an identity-provider subject.
    pub fn new(external_ref: impl Into<String>) -> Self {
        NewAccount {
            external_ref: external_ref.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// The kind of a point-balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Points earned from a purchase.
    Earned,
    /// Points spent on an order discount.
    Redeemed,
    /// One-time referral bonus.
    Referral,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Earned => write!(f, "earned"),
            LedgerKind::Redeemed => write!(f, "redeemed"),
            LedgerKind::Referral => write!(f, "referral"),
        }
    }
}

/// Immutable record of one signed point-balance change.
///
/// Never updated or deleted after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    /// Positive for credits, negative for debits.
    pub delta: i64,
    pub kind: LedgerKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Stored balance compared against the ledger sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub stored_balance: i64,
    pub ledger_sum: i64,
}

impl Reconciliation {
    /// True when the balance is exactly reconstructible from the ledger.
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_sum
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Storefront category grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Vegetable,
    Fruit,
    Other,
}

/// Package sizes a product is sold in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Small,
    Medium,
    Large,
    ExtraLarge,
    FamilyPack,
}

/// A product in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category_type: CategoryType,
    pub description: String,
    /// Reference price in minor units (variants carry the selling price).
    pub base_price_cents: i64,
    /// Points earned per unit purchased of any of its variants.
    pub points_per_unit: i64,
    /// Whether product is active (soft delete).
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A sellable package of a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub package_type: PackageType,
    /// Display weight, e.g. "500g".
    pub weight: String,
    pub price_cents: i64,
    /// Recorded only; stock is never reserved by checkout.
    pub stock_quantity: i64,
}

/// What the catalog resolves a variant reference to at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CatalogVariant {
    pub variant_id: String,
    pub product_id: String,
    pub product_name: String,
    pub weight: String,
    /// Current catalog price in minor units.
    pub unit_price_cents: i64,
    /// Current point-earn rate per unit.
    pub points_per_unit: i64,
}

impl CatalogVariant {
    /// Returns the current unit price.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// A stored cart line: one variant and its quantity for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartLine {
    pub account_id: String,
    pub variant_id: String,
    pub quantity: i64,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line joined with the live catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedCartLine {
    pub variant: CatalogVariant,
    pub quantity: i64,
}

impl PricedCartLine {
    /// Line total at the current catalog price.
    pub fn line_total(&self) -> Money {
        self.variant.unit_price().multiply_quantity(self.quantity)
    }

    /// Points this line would earn.
    pub fn points(&self) -> i64 {
        self.variant.points_per_unit * self.quantity
    }
}

/// Cart summary (live estimate, unlike frozen order totals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub line_count: usize,
    pub total_quantity: i64,
    pub subtotal_cents: i64,
}

impl From<&[PricedCartLine]> for CartTotals {
    fn from(lines: &[PricedCartLine]) -> Self {
        CartTotals {
            line_count: lines.len(),
            total_quantity: lines.iter().map(|l| l.quantity).sum(),
            subtotal_cents: lines.iter().map(|l| l.line_total()).sum::<Money>().cents(),
        }
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle of an order.
///
/// ```text
/// pending ──► processing ──► shipped ──► delivered
///    │             │
///    └─────────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Delivered and cancelled orders never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Whether `next` is a legal single step from `self`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            _ => Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: ["pending", "processing", "shipped", "delivered", "cancelled"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A committed order. Immutable apart from `status` and `artifact_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub account_id: String,
    /// Sum of frozen line totals.
    pub subtotal_cents: i64,
    /// Amount due after the points discount.
    pub total_amount_cents: i64,
    /// Store currency at checkout, frozen like the line prices.
    pub currency_code: String,
    pub points_redeemed: i64,
    pub points_discount_cents: i64,
    pub points_earned: i64,
    pub status: OrderStatus,
    /// Payment reference, attached after commit.
    pub artifact_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns the amount due as Money.
    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }

    /// Returns the applied points discount as Money.
    #[inline]
    pub fn points_discount(&self) -> Money {
        Money::from_cents(self.points_discount_cents)
    }
}

/// A line of an order. Uses the snapshot pattern: the unit price is the
/// catalog price at checkout and never follows later price changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub variant_id: String,
    /// Product name at time of order (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    /// Unit price in minor units at time of order (frozen).
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    /// Returns the frozen unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Store-wide settings, passed explicitly into every operation that needs
/// them and read fresh for each transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub company_name: String,
    pub bank_name: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
    /// Conversion factor from points to money.
    pub points_to_currency_rate: PointsRate,
    /// Points credited to each party of a referral.
    pub referral_bonus_amount: i64,
    /// ISO 4217 code printed on payment references.
    pub currency_code: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            company_name: "Fresh Market".to_string(),
            bank_name: String::new(),
            bank_account_name: String::new(),
            bank_account_number: String::new(),
            points_to_currency_rate: PointsRate::default(),
            referral_bonus_amount: crate::DEFAULT_REFERRAL_BONUS,
            currency_code: "THB".to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_forward_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));

        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Shipped.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_order_status_cancellation() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(Cancelled.is_terminal());
        assert!(Delivered.is_terminal());
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!("Shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert_eq!("canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert!("lost".parse::<OrderStatus>().is_err());
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_reconciliation() {
        let ok = Reconciliation { stored_balance: 40, ledger_sum: 40 };
        let bad = Reconciliation { stored_balance: 40, ledger_sum: 35 };
        assert!(ok.is_consistent());
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_store_settings_defaults() {
        let settings = StoreSettings::default();
        assert_eq!(settings.points_to_currency_rate.minor_per_point(), 10);
        assert_eq!(settings.referral_bonus_amount, 50);
    }
}
