//! # market-core
//!
//! Domain model and arithmetic for a storefront's checkout and loyalty
//! points. Nothing in this crate touches a database, a clock or the network;
//! callers pass in the prices, balances and timestamps it works on.
//!
//! ```text
//!   market-engine ──uses──► market-core ◄──uses── market-db
//!                           ├─ types       accounts, ledger, carts, orders
//!                           ├─ money       Money (minor units), PointsRate
//!                           ├─ checkout    frozen lines, capped discount
//!                           ├─ artifact    payment reference digest
//!                           ├─ validation  input rules
//!                           └─ error       CoreError, ValidationError
//! ```
//!
//! ```rust
//! use market_core::money::{Money, PointsRate};
//!
//! // 0.10 per point, stored as 10 minor units
//! let rate = PointsRate::from_minor_per_point(10);
//! assert_eq!(rate.value_of(100), Money::from_cents(1000));
//!
//! // The discount never exceeds what is being bought
//! assert_eq!(rate.capped_discount(500, Money::from_cents(2000)), Money::from_cents(2000));
//! ```

pub mod artifact;
pub mod checkout;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

pub use artifact::PaymentReference;
pub use checkout::{CheckoutQuote, QuoteLine};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, PointsRate};
pub use types::*;

/// Distinct variants one cart may hold.
pub const MAX_CART_ITEMS: usize = 100;

/// Upper bound on a single cart line, after merging repeated adds.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Referral bonus used until the settings row says otherwise.
pub const DEFAULT_REFERRAL_BONUS: i64 = 50;

/// 0.10 per point, used until the settings row says otherwise.
pub const DEFAULT_POINTS_RATE_MINOR: i64 = 10;
