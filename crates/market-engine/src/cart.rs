//! # Cart Staging
//!
//! Per-account staging of variant lines before checkout.
//!
//! ## Cart Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Cart Lifecycle                                 │
//! │                                                                         │
//! │  ┌────────┐  add_item   ┌────────────┐  submit_checkout  ┌───────────┐ │
//! │  │ Empty  │ ──────────► │ Has Items  │ ────────────────► │ Cleared   │ │
//! │  └────────┘             └────────────┘  (same tx as the  └───────────┘ │
//! │       ▲                   │        ▲     order insert)                 │
//! │       │    clear /        │        │ set_quantity / remove_item        │
//! │       └── remove last ────┘        └───────────────                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines hold quantities only. Prices are joined from the catalog on every
//! read, so [`CartStaging::total_price`] is a live estimate.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::balance::missing_account;
use crate::config::CheckoutSettings;
use crate::error::EngineResult;
use crate::retry::with_retry;
use market_core::validation::{validate_cart_size, validate_quantity};
use market_core::{CartTotals, CoreError, Money, PricedCartLine, ValidationError, MAX_ITEM_QUANTITY};
use market_db::{AccountRepository, CartRepository, CatalogRepository, Database, DbError};

/// Cart contents with live prices.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub lines: Vec<PricedCartLine>,
    pub totals: CartTotals,
    /// Lines whose product was withdrawn since they were added.
    pub unavailable: Vec<String>,
}

/// Cart operations.
#[derive(Debug, Clone)]
pub struct CartStaging {
    db: Database,
    policy: CheckoutSettings,
}

impl CartStaging {
    pub fn new(db: Database, policy: CheckoutSettings) -> Self {
        CartStaging { db, policy }
    }

    /// Adds `quantity` of a variant. An existing line has the quantities
    /// summed. Returns the resulting line quantity.
    pub async fn add_item(
        &self,
        account_id: &str,
        variant_id: &str,
        quantity: i64,
    ) -> EngineResult<i64> {
        validate_quantity(quantity)?;

        let total = with_retry("add_item", &self.policy, move || {
            self.try_add_item(account_id, variant_id, quantity)
        })
        .await?;

        info!(account_id = %account_id, variant_id = %variant_id, quantity = total, "Item added to cart");
        Ok(total)
    }

    async fn try_add_item(
        &self,
        account_id: &str,
        variant_id: &str,
        quantity: i64,
    ) -> EngineResult<i64> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        AccountRepository::lock_for_update(&mut tx, account_id, now)
            .await
            .map_err(|e| missing_account(e, account_id))?;

        if CatalogRepository::get_variant(&mut tx, variant_id).await?.is_none() {
            return Err(CoreError::VariantNotFound(variant_id.to_string()).into());
        }

        let existing = CartRepository::quantity_of(&mut tx, account_id, variant_id).await?;
        match existing {
            Some(current) => {
                if current + quantity > MAX_ITEM_QUANTITY {
                    return Err(ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: 1,
                        max: MAX_ITEM_QUANTITY,
                    }
                    .into());
                }
            }
            None => {
                let lines = CartRepository::line_count(&mut tx, account_id).await?;
                validate_cart_size(lines as usize)?;
            }
        }

        let total =
            CartRepository::add_quantity(&mut tx, account_id, variant_id, quantity, now).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(total)
    }

    /// Overwrites the quantity of an existing line.
    ///
    /// A quantity of zero is rejected; use [`CartStaging::remove_item`].
    pub async fn set_quantity(
        &self,
        account_id: &str,
        variant_id: &str,
        quantity: i64,
    ) -> EngineResult<()> {
        if quantity <= 0 {
            return Err(CoreError::InvalidAmount { amount: quantity }.into());
        }
        validate_quantity(quantity)?;

        with_retry("set_quantity", &self.policy, move || async move {
            let now = Utc::now();
            let mut tx = self.db.begin().await?;
            AccountRepository::lock_for_update(&mut tx, account_id, now)
                .await
                .map_err(|e| missing_account(e, account_id))?;

            if !CartRepository::set_quantity(&mut tx, account_id, variant_id, quantity, now).await? {
                return Err(item_not_found(account_id, variant_id));
            }
            tx.commit().await.map_err(DbError::from)?;
            Ok(())
        })
        .await?;

        debug!(account_id = %account_id, variant_id = %variant_id, quantity, "Cart quantity set");
        Ok(())
    }

    /// Removes one line.
    pub async fn remove_item(&self, account_id: &str, variant_id: &str) -> EngineResult<()> {
        with_retry("remove_item", &self.policy, move || async move {
            let mut tx = self.db.begin().await?;
            AccountRepository::lock_for_update(&mut tx, account_id, Utc::now())
                .await
                .map_err(|e| missing_account(e, account_id))?;

            if !CartRepository::remove(&mut tx, account_id, variant_id).await? {
                return Err(item_not_found(account_id, variant_id));
            }
            tx.commit().await.map_err(DbError::from)?;
            Ok(())
        })
        .await?;

        debug!(account_id = %account_id, variant_id = %variant_id, "Cart line removed");
        Ok(())
    }

    /// Removes every line. Returns how many were removed.
    pub async fn clear(&self, account_id: &str) -> EngineResult<u64> {
        let removed = with_retry("clear_cart", &self.policy, move || async move {
            let mut tx = self.db.begin().await?;
            AccountRepository::lock_for_update(&mut tx, account_id, Utc::now())
                .await
                .map_err(|e| missing_account(e, account_id))?;
            let removed = CartRepository::clear(&mut tx, account_id).await?;
            tx.commit().await.map_err(DbError::from)?;
            Ok(removed)
        })
        .await?;

        info!(account_id = %account_id, removed, "Cart cleared");
        Ok(removed)
    }

    /// Sum of `unit_price × quantity` at current catalog prices.
    pub async fn total_price(&self, account_id: &str) -> EngineResult<Money> {
        let view = self.view(account_id).await?;
        Ok(Money::from_cents(view.totals.subtotal_cents))
    }

    /// Lines joined with live catalog data.
    ///
    /// Withdrawn products are listed in `unavailable` and left out of the
    /// totals; checkout refuses them.
    pub async fn view(&self, account_id: &str) -> EngineResult<CartView> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
        if AccountRepository::find(&mut conn, account_id).await?.is_none() {
            return Err(CoreError::AccountNotFound(account_id.to_string()).into());
        }

        let rows = CartRepository::priced_lines(&mut conn, account_id).await?;
        let mut lines = Vec::with_capacity(rows.len());
        let mut unavailable = Vec::new();
        for row in rows {
            if row.is_active {
                lines.push(PricedCartLine::from(row));
            } else {
                unavailable.push(row.variant_id);
            }
        }

        let totals = CartTotals::from(lines.as_slice());
        Ok(CartView {
            lines,
            totals,
            unavailable,
        })
    }
}

fn item_not_found(account_id: &str, variant_id: &str) -> crate::error::EngineError {
    CoreError::ItemNotFound {
        account_id: account_id.to_string(),
        variant_id: variant_id.to_string(),
    }
    .into()
}
