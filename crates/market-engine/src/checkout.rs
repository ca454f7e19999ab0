//! # Checkout Engine
//!
//! Turns an account's cart into an order in one atomic unit.
//!
//! ## Atomic Unit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ BEGIN                                                                   │
//! │  1. lock account row            (UPDATE … RETURNING, first statement)   │
//! │  2. load store settings          (rate in effect right now)             │
//! │  3. read cart with live prices   (then frozen into the quote)           │
//! │  4. quote: subtotal, discount = min(points × rate, subtotal), total     │
//! │     EmptyCart / InsufficientBalance abort here, nothing written         │
//! │  5. insert order (pending, store currency) + lines (frozen unit prices) │
//! │  6. debit redeemed points        → ledger entry kind "redeemed"         │
//! │  7. credit earned points         → ledger entry kind "earned"           │
//! │  8. clear cart                                                          │
//! │ COMMIT                                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!   9. payment reference (outside the unit, failure is advisory)
//! ```
//!
//! Any error before COMMIT drops the transaction, which rolls back every
//! write. Lock contention retries the whole unit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactOutcome, OrderArtifactGenerator};
use crate::balance::{credit_in, debit_in, missing_account};
use crate::config::CheckoutSettings;
use crate::error::EngineResult;
use crate::retry::with_retry;
use market_core::validation::validate_points_to_redeem;
use market_core::{
    CheckoutQuote, CoreError, LedgerEntry, LedgerKind, Money, Order, OrderLine, OrderStatus,
    PointsRate, PricedCartLine, QuoteLine,
};
use market_db::{
    generate_order_line_id, generate_order_number, AccountRepository, CartRepository, CartRow,
    Database, DbError, OrderRepository, SettingsRepository,
};

/// Fresh order numbers tried when one collides.
const ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Result of a committed checkout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    /// Absent when no points were redeemed.
    pub redeemed_entry: Option<LedgerEntry>,
    /// Absent when the order earns no points. No `earned` entry is written
    /// for such an order, since a zero credit is not a valid ledger amount.
    pub earned_entry: Option<LedgerEntry>,
    pub balance_after: i64,
    pub artifact: ArtifactOutcome,
}

/// Read-only figures for the checkout page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPreview {
    pub lines: Vec<QuoteLine>,
    pub subtotal: Money,
    pub available_points: i64,
    /// Discount if the whole balance were redeemed.
    pub max_points_discount: Money,
    pub points_to_earn: i64,
    pub rate: PointsRate,
}

/// Output of the atomic unit, before the artifact step.
struct Committed {
    order: Order,
    lines: Vec<OrderLine>,
    redeemed_entry: Option<LedgerEntry>,
    earned_entry: Option<LedgerEntry>,
    balance_after: i64,
}

/// Runs checkouts.
#[derive(Debug, Clone)]
pub struct CheckoutEngine {
    db: Database,
    policy: CheckoutSettings,
    artifacts: OrderArtifactGenerator,
}

impl CheckoutEngine {
    pub fn new(db: Database, policy: CheckoutSettings) -> Self {
        let artifacts = OrderArtifactGenerator::new(db.clone());
        CheckoutEngine {
            db,
            policy,
            artifacts,
        }
    }

    /// Converts the cart into a pending order, redeeming `points_to_redeem`.
    ///
    /// ## Errors
    /// - `EmptyCart` when the cart has no lines
    /// - `InsufficientBalance` when `points_to_redeem` exceeds the balance
    /// - `InvalidAmount` when `points_to_redeem` is negative
    /// - `VariantNotFound` when a line's product was withdrawn
    /// - `ConcurrentUpdateConflict` when lock contention outlasts the retries
    ///
    /// On any error nothing is written and the cart is left as it was.
    pub async fn submit_checkout(
        &self,
        account_id: &str,
        points_to_redeem: i64,
    ) -> EngineResult<CheckoutReceipt> {
        validate_points_to_redeem(points_to_redeem)?;

        let committed = with_retry("checkout", &self.policy, move || {
            self.try_checkout(account_id, points_to_redeem)
        })
        .await?;

        info!(
            account_id = %account_id,
            order_number = %committed.order.order_number,
            total = %committed.order.total_amount(),
            points_redeemed = committed.order.points_redeemed,
            points_earned = committed.order.points_earned,
            "Checkout committed"
        );

        let mut order = committed.order;
        let artifact = self.artifacts.generate_for(&order).await;
        if let Some(reference) = artifact.reference() {
            order.artifact_ref = Some(reference.to_string());
        }

        Ok(CheckoutReceipt {
            order,
            lines: committed.lines,
            redeemed_entry: committed.redeemed_entry,
            earned_entry: committed.earned_entry,
            balance_after: committed.balance_after,
            artifact,
        })
    }

    async fn try_checkout(&self, account_id: &str, points_to_redeem: i64) -> EngineResult<Committed> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let account = AccountRepository::lock_for_update(&mut tx, account_id, now)
            .await
            .map_err(|e| missing_account(e, account_id))?;
        let settings = SettingsRepository::load(&mut tx).await?;

        let rows = CartRepository::priced_lines(&mut tx, account_id).await?;
        let quote = CheckoutQuote::compute(
            quote_lines(rows)?,
            settings.points_to_currency_rate,
            points_to_redeem,
        )?;
        quote.ensure_covered_by(account_id, account.points)?;

        debug!(
            account_id = %account_id,
            subtotal = %quote.subtotal,
            discount = %quote.discount,
            total = %quote.total,
            unused_points = quote.unused_points(),
            "Checkout quoted"
        );

        let order = insert_order(&mut tx, account_id, &quote, &settings.currency_code, now).await?;

        let mut lines = Vec::with_capacity(quote.lines.len());
        for line in &quote.lines {
            let order_line = OrderLine {
                id: generate_order_line_id(),
                order_id: order.id.clone(),
                variant_id: line.variant_id.clone(),
                name_snapshot: line.name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                line_total_cents: line.line_total().cents(),
                created_at: now,
            };
            OrderRepository::insert_line(&mut tx, &order_line).await?;
            lines.push(order_line);
        }

        let mut balance_after = account.points;

        let redeemed_entry = if quote.points_redeemed > 0 {
            let reason = format!("Redeemed on order {}", order.order_number);
            let change = debit_in(
                &mut tx,
                account_id,
                quote.points_redeemed,
                LedgerKind::Redeemed,
                &reason,
                now,
            )
            .await?;
            balance_after = change.balance;
            Some(change.entry)
        } else {
            None
        };

        let earned_entry = if quote.points_earned > 0 {
            let reason = format!("Earned on order {}", order.order_number);
            let change = credit_in(
                &mut tx,
                account_id,
                quote.points_earned,
                LedgerKind::Earned,
                &reason,
                now,
            )
            .await?;
            balance_after = change.balance;
            Some(change.entry)
        } else {
            None
        };

        CartRepository::clear(&mut tx, account_id).await?;
        tx.commit().await.map_err(DbError::from)?;

        Ok(Committed {
            order,
            lines,
            redeemed_entry,
            earned_entry,
            balance_after,
        })
    }

    /// Subtotal, available points and the best possible discount, without
    /// writing anything.
    pub async fn preview_checkout(&self, account_id: &str) -> EngineResult<CheckoutPreview> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;

        let account = AccountRepository::find(&mut conn, account_id)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;
        let settings = SettingsRepository::load(&mut conn).await?;
        let rows = CartRepository::priced_lines(&mut conn, account_id).await?;

        let quote = CheckoutQuote::compute(quote_lines(rows)?, settings.points_to_currency_rate, 0)?;
        let rate = settings.points_to_currency_rate;

        Ok(CheckoutPreview {
            max_points_discount: rate.capped_discount(account.points, quote.subtotal),
            subtotal: quote.subtotal,
            available_points: account.points,
            points_to_earn: quote.points_earned,
            lines: quote.lines,
            rate,
        })
    }
}

/// Freezes cart rows into quote lines. Withdrawn products abort checkout.
fn quote_lines(rows: Vec<CartRow>) -> EngineResult<Vec<QuoteLine>> {
    rows.into_iter()
        .map(|row| -> EngineResult<QuoteLine> {
            if !row.is_active {
                return Err(CoreError::VariantNotFound(row.variant_id).into());
            }
            Ok(QuoteLine::from(&PricedCartLine::from(row)))
        })
        .collect()
}

/// Inserts the pending order, drawing a new number if one collides.
async fn insert_order(
    conn: &mut SqliteConnection,
    account_id: &str,
    quote: &CheckoutQuote,
    currency_code: &str,
    now: DateTime<Utc>,
) -> EngineResult<Order> {
    let mut order = Order {
        id: Uuid::new_v4().to_string(),
        order_number: generate_order_number(now),
        account_id: account_id.to_string(),
        subtotal_cents: quote.subtotal.cents(),
        total_amount_cents: quote.total.cents(),
        currency_code: currency_code.to_string(),
        points_redeemed: quote.points_redeemed,
        points_discount_cents: quote.discount.cents(),
        points_earned: quote.points_earned,
        status: OrderStatus::Pending,
        artifact_ref: None,
        created_at: now,
        updated_at: now,
    };

    let mut attempt = 1;
    loop {
        match OrderRepository::insert(conn, &order).await {
            Ok(()) => return Ok(order),
            Err(err) if err.is_unique_violation_on("order_number") && attempt < ORDER_NUMBER_ATTEMPTS => {
                warn!(order_number = %order.order_number, attempt, "Order number collision, drawing another");
                order.order_number = generate_order_number(now);
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartStaging;
    use crate::error::EngineError;
    use crate::testing::{grant_points, product_of, seed_account, seed_variant, test_db};
    use market_db::DbConfig;
    use std::time::Duration;

    struct Fixture {
        db: Database,
        engine: CheckoutEngine,
        carts: CartStaging,
        account_id: String,
        spinach: String,
    }

    async fn fixture() -> Fixture {
        let db = test_db().await;
        let account = seed_account(&db, "shopper").await;
        let spinach = seed_variant(&db, "Fresh Spinach", 2500, 5).await;
        Fixture {
            engine: CheckoutEngine::new(db.clone(), CheckoutSettings::default()),
            carts: CartStaging::new(db.clone(), CheckoutSettings::default()),
            db,
            account_id: account.id,
            spinach,
        }
    }

    #[tokio::test]
    async fn test_checkout_with_redemption() {
        // 100 points at 0.10 against a 50.00 cart
        let f = fixture().await;
        grant_points(&f.db, &f.account_id, 100).await;
        f.carts.add_item(&f.account_id, &f.spinach, 2).await.unwrap();

        let receipt = f.engine.submit_checkout(&f.account_id, 100).await.unwrap();

        assert_eq!(receipt.order.subtotal_cents, 5000);
        assert_eq!(receipt.order.points_discount_cents, 1000);
        assert_eq!(receipt.order.total_amount_cents, 4000);
        assert_eq!(receipt.order.status, OrderStatus::Pending);
        assert_eq!(receipt.order.points_earned, 10);
        assert_eq!(receipt.redeemed_entry.as_ref().unwrap().delta, -100);
        assert_eq!(receipt.earned_entry.as_ref().unwrap().delta, 10);
        assert_eq!(receipt.balance_after, 10);
        assert!(receipt.artifact.is_generated());
        assert_eq!(receipt.order.artifact_ref.as_deref(), receipt.artifact.reference());

        let ledger = f.db.ledger().recent(&f.account_id, 10).await.unwrap();
        let kinds: Vec<LedgerKind> = ledger.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![LedgerKind::Earned, LedgerKind::Redeemed, LedgerKind::Referral]
        );

        assert!(f.db.accounts().reconcile(&f.account_id).await.unwrap().is_consistent());
        assert!(f.carts.view(&f.account_id).await.unwrap().lines.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_everything_untouched() {
        let f = fixture().await;
        grant_points(&f.db, &f.account_id, 100).await;
        f.carts.add_item(&f.account_id, &f.spinach, 2).await.unwrap();

        let err = f.engine.submit_checkout(&f.account_id, 600).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InsufficientBalance {
                balance: 100,
                requested: 600,
                ..
            })
        ));

        assert_eq!(f.db.accounts().balance(&f.account_id).await.unwrap(), 100);
        assert_eq!(f.db.ledger().count(&f.account_id).await.unwrap(), 1);
        assert!(f.db.orders().list_for_account(&f.account_id, 10).await.unwrap().is_empty());
        assert_eq!(f.carts.view(&f.account_id).await.unwrap().lines.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let f = fixture().await;
        let err = f.engine.submit_checkout(&f.account_id, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::EmptyCart)));

        let err = f.engine.submit_checkout(&f.account_id, -1).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidAmount { amount: -1 })));
    }

    #[tokio::test]
    async fn test_discount_capped_at_subtotal() {
        let f = fixture().await;
        let mango = seed_variant(&f.db, "Sweet Mango", 4500, 8).await;
        grant_points(&f.db, &f.account_id, 600).await;
        f.carts.add_item(&f.account_id, &mango, 1).await.unwrap();

        let receipt = f.engine.submit_checkout(&f.account_id, 600).await.unwrap();
        assert_eq!(receipt.order.points_discount_cents, 4500);
        assert_eq!(receipt.order.total_amount_cents, 0);
        // The full request is debited even though only 450 points were usable
        assert_eq!(receipt.order.points_redeemed, 600);
        assert_eq!(receipt.balance_after, 8);
        assert!(f.db.accounts().reconcile(&f.account_id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_zero_earning_order_writes_no_earned_entry() {
        let f = fixture().await;
        let bag = seed_variant(&f.db, "Paper Bag", 300, 0).await;
        f.carts.add_item(&f.account_id, &bag, 2).await.unwrap();

        let receipt = f.engine.submit_checkout(&f.account_id, 0).await.unwrap();
        assert_eq!(receipt.order.points_earned, 0);
        assert!(receipt.earned_entry.is_none());
        assert!(receipt.redeemed_entry.is_none());
        assert_eq!(receipt.balance_after, 0);
        assert_eq!(f.db.ledger().count(&f.account_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_order_prices_are_frozen() {
        let f = fixture().await;
        f.carts.add_item(&f.account_id, &f.spinach, 3).await.unwrap();
        let receipt = f.engine.submit_checkout(&f.account_id, 0).await.unwrap();
        assert!(receipt.redeemed_entry.is_none());

        f.db.catalog().set_variant_price(&f.spinach, 9900).await.unwrap();

        let lines = f.db.orders().get_lines(&receipt.order.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_price_cents, 2500);
        assert_eq!(lines[0].line_total_cents, 7500);
        assert_eq!(lines[0].name_snapshot, "Fresh Spinach");
    }

    #[tokio::test]
    async fn test_rate_is_read_at_checkout_time() {
        let f = fixture().await;
        grant_points(&f.db, &f.account_id, 100).await;
        f.carts.add_item(&f.account_id, &f.spinach, 2).await.unwrap();

        let mut settings = f.db.settings().current().await.unwrap();
        settings.points_to_currency_rate = PointsRate::from_minor_per_point(25);
        settings.currency_code = "USD".to_string();
        f.db.settings().save(&settings, Utc::now()).await.unwrap();

        let receipt = f.engine.submit_checkout(&f.account_id, 100).await.unwrap();
        assert_eq!(receipt.order.points_discount_cents, 2500);
        assert_eq!(receipt.order.total_amount_cents, 2500);
        assert_eq!(receipt.order.currency_code, "USD");

        // Switching back does not touch the placed order or its reference
        settings.currency_code = "THB".to_string();
        f.db.settings().save(&settings, Utc::now()).await.unwrap();
        let stored = f.db.orders().get_by_number(&receipt.order.order_number).await.unwrap().unwrap();
        assert_eq!(stored.currency_code, "USD");
        let reference = receipt.artifact.reference().unwrap();
        assert!(f
            .engine
            .artifacts
            .verify_artifact(&stored.order_number, reference)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_withdrawn_product_blocks_checkout() {
        let f = fixture().await;
        f.carts.add_item(&f.account_id, &f.spinach, 1).await.unwrap();
        let product = product_of(&f.db, &f.spinach).await;
        f.db.catalog().set_product_active(&product, false).await.unwrap();

        let err = f.engine.submit_checkout(&f.account_id, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::VariantNotFound(_))));
        assert!(f.db.orders().list_for_account(&f.account_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preview() {
        let f = fixture().await;
        grant_points(&f.db, &f.account_id, 1000).await;
        f.carts.add_item(&f.account_id, &f.spinach, 2).await.unwrap();

        let preview = f.engine.preview_checkout(&f.account_id).await.unwrap();
        assert_eq!(preview.subtotal.cents(), 5000);
        assert_eq!(preview.available_points, 1000);
        assert_eq!(preview.max_points_discount.cents(), 5000);
        assert_eq!(preview.points_to_earn, 10);

        // Nothing written
        assert_eq!(f.db.ledger().count(&f.account_id).await.unwrap(), 1);
    }

    async fn file_db(dir: &tempfile::TempDir, busy: Duration) -> Database {
        let config = DbConfig::new(dir.path().join("market.db"))
            .max_connections(4)
            .busy_timeout(busy);
        Database::new(config).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_commit_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, Duration::from_secs(5)).await;
        let account = seed_account(&db, "racer").await;
        let spinach = seed_variant(&db, "Fresh Spinach", 2500, 5).await;
        grant_points(&db, &account.id, 100).await;

        let carts = CartStaging::new(db.clone(), CheckoutSettings::default());
        carts.add_item(&account.id, &spinach, 2).await.unwrap();

        let engine = CheckoutEngine::new(db.clone(), CheckoutSettings::default());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                let account_id = account.id.clone();
                tokio::spawn(async move { engine.submit_checkout(&account_id, 100).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(
                    err,
                    EngineError::Core(
                        CoreError::EmptyCart | CoreError::ConcurrentUpdateConflict { .. }
                    )
                )),
            }
        }
        assert_eq!(successes, 1);

        assert_eq!(db.orders().list_for_account(&account.id, 10).await.unwrap().len(), 1);
        assert_eq!(db.accounts().balance(&account.id).await.unwrap(), 10);
        assert!(db.accounts().reconcile(&account.id).await.unwrap().is_consistent());
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_contention_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, Duration::from_millis(50)).await;
        let account = seed_account(&db, "blocked").await;
        let spinach = seed_variant(&db, "Fresh Spinach", 2500, 5).await;
        CartStaging::new(db.clone(), CheckoutSettings::default())
            .add_item(&account.id, &spinach, 1)
            .await
            .unwrap();

        let mut blocker = db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *blocker).await.unwrap();

        let policy = CheckoutSettings {
            max_commit_attempts: 2,
            retry_backoff_ms: 1,
        };
        let engine = CheckoutEngine::new(db.clone(), policy);
        let err = engine.submit_checkout(&account.id, 0).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::ConcurrentUpdateConflict { attempts: 2 })
        ));

        sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
        drop(blocker);

        // The cart survived and a later attempt goes through
        let receipt = engine.submit_checkout(&account.id, 0).await.unwrap();
        assert_eq!(receipt.order.total_amount_cents, 2500);
        db.close().await;
    }
}
