//! # market-engine: Checkout and Points Engine for Fresh Market
//!
//! This crate runs every operation of the storefront's loyalty-points
//! system as an atomic unit on top of `market-db`.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Engine Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Market (facade)                             │  │
//! │  │                                                                  │  │
//! │  │  submit_checkout · query_balance · query_ledger · apply_referral │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ CheckoutEngine │  │ ReferralService│  │  CartStaging           │    │
//! │  │                │  │                │  │                        │    │
//! │  │ cart → order   │  │ registration + │  │ add / set / remove /   │    │
//! │  │ + ledger in    │  │ one-time bonus │  │ clear, live totals     │    │
//! │  │ one tx         │  │                │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │          │                   │                                          │
//! │          ▼                   ▼                                          │
//! │  ┌──────────────────────────────────────┐  ┌────────────────────────┐  │
//! │  │ AccountBalance (credit / debit)      │  │ OrderArtifactGenerator │  │
//! │  │ ledger entry + balance, same tx      │  │ after commit, advisory │  │
//! │  └──────────────────────────────────────┘  └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`balance`] - Credits and debits of points
//! - [`cart`] - Cart staging
//! - [`checkout`] - The checkout unit and its preview
//! - [`referral`] - Registration and referral bonuses
//! - [`artifact`] - Payment references for committed orders
//! - [`orders`] - Order queries and status changes
//! - [`config`] - `market.toml` loading
//! - [`error`] - Engine error type and codes
//! - [`telemetry`] - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use market_engine::{Market, MarketConfig};
//! use market_core::NewAccount;
//!
//! market_engine::telemetry::init_tracing();
//! let market = Market::open(MarketConfig::load_or_default(None)).await?;
//!
//! let alice = market.register_account(NewAccount::new("alice"), None).await?.account;
//! market.carts().add_item(&alice.id, &variant_id, 2).await?;
//!
//! let receipt = market.submit_checkout(&alice.id, 100).await?;
//! println!("{} due {}", receipt.order.order_number, receipt.order.total_amount());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod artifact;
pub mod balance;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod orders;
pub mod referral;
pub mod telemetry;

mod retry;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use artifact::{ArtifactOutcome, OrderArtifactGenerator, PaymentSummary, RegenerationReport};
pub use balance::{AccountBalance, BalanceChange};
pub use cart::{CartStaging, CartView};
pub use checkout::{CheckoutEngine, CheckoutPreview, CheckoutReceipt};
pub use config::MarketConfig;
pub use error::{EngineError, EngineResult, ErrorBody, ErrorCode};
pub use orders::{OrderDetails, OrderService};
pub use referral::{ReferralOutcome, ReferralService, Registration};

use chrono::Utc;
use tracing::info;

use market_core::{
    LedgerEntry, NewAccount, Order, OrderStatus, Reconciliation, StoreSettings,
};
use market_db::{Database, DbConfig};

// =============================================================================
// Market
// =============================================================================

/// Entry point holding every engine service over one database.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Market {
    db: Database,
    config: MarketConfig,
    balances: AccountBalance,
    carts: CartStaging,
    checkout: CheckoutEngine,
    referrals: ReferralService,
    artifacts: OrderArtifactGenerator,
    orders: OrderService,
}

impl Market {
    /// Opens (and migrates) the configured database.
    pub async fn open(config: MarketConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()?).await?;
        Self::with_database(db, config).await
    }

    /// Private in-memory market with default configuration.
    pub async fn in_memory() -> EngineResult<Self> {
        let db = Database::new(DbConfig::in_memory()).await?;
        Self::with_database(db, MarketConfig::default()).await
    }

    /// Builds the services over an existing database.
    ///
    /// The `[store]` section is written only when the database has no
    /// settings yet.
    pub async fn with_database(db: Database, config: MarketConfig) -> EngineResult<Self> {
        let settings = config.store.to_settings()?;
        if db.settings().initialize(&settings, Utc::now()).await? {
            info!(company = %settings.company_name, "Store settings seeded from config");
        }

        let policy = config.checkout.clone();
        Ok(Market {
            balances: AccountBalance::new(db.clone(), policy.clone()),
            carts: CartStaging::new(db.clone(), policy.clone()),
            checkout: CheckoutEngine::new(db.clone(), policy.clone()),
            referrals: ReferralService::new(db.clone(), policy),
            artifacts: OrderArtifactGenerator::new(db.clone()),
            orders: OrderService::new(db.clone()),
            db,
            config,
        })
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Converts the account's cart into an order. See
    /// [`CheckoutEngine::submit_checkout`].
    pub async fn submit_checkout(
        &self,
        account_id: &str,
        points_to_redeem: i64,
    ) -> EngineResult<CheckoutReceipt> {
        self.checkout.submit_checkout(account_id, points_to_redeem).await
    }

    pub async fn preview_checkout(&self, account_id: &str) -> EngineResult<CheckoutPreview> {
        self.checkout.preview_checkout(account_id).await
    }

    /// Current point balance.
    pub async fn query_balance(&self, account_id: &str) -> EngineResult<i64> {
        self.balances.balance(account_id).await
    }

    /// Ledger entries, most recent first.
    pub async fn query_ledger(&self, account_id: &str, limit: i64) -> EngineResult<Vec<LedgerEntry>> {
        self.balances.ledger(account_id, limit).await
    }

    pub async fn reconcile(&self, account_id: &str) -> EngineResult<Reconciliation> {
        self.balances.reconcile(account_id).await
    }

    pub async fn apply_referral(
        &self,
        account_id: &str,
        token: &str,
    ) -> EngineResult<ReferralOutcome> {
        self.referrals.apply_referral(account_id, token).await
    }

    /// Creates an account (profile included) and applies the optional
    /// referral token.
    pub async fn register_account(
        &self,
        input: NewAccount,
        referral_token: Option<&str>,
    ) -> EngineResult<Registration> {
        self.referrals.register_account(input, referral_token).await
    }

    pub async fn get_order(&self, order_number: &str) -> EngineResult<OrderDetails> {
        self.orders.get_order(order_number).await
    }

    pub async fn list_orders(&self, account_id: &str, limit: i64) -> EngineResult<Vec<Order>> {
        self.orders.list_orders(account_id, limit).await
    }

    pub async fn update_order_status(
        &self,
        order_number: &str,
        next: OrderStatus,
    ) -> EngineResult<Order> {
        self.orders.update_order_status(order_number, next).await
    }

    pub async fn payment_summary(&self, order_number: &str) -> EngineResult<PaymentSummary> {
        self.artifacts.payment_summary(order_number).await
    }

    pub async fn verify_artifact(&self, order_number: &str, reference: &str) -> EngineResult<bool> {
        self.artifacts.verify_artifact(order_number, reference).await
    }

    pub async fn regenerate_missing_artifacts(&self, limit: i64) -> EngineResult<RegenerationReport> {
        self.artifacts.regenerate_missing(limit).await
    }

    /// Settings in effect now.
    pub async fn settings(&self) -> EngineResult<StoreSettings> {
        Ok(self.db.settings().current().await?)
    }

    /// Replaces the store settings. Applies to every unit that starts
    /// afterwards.
    pub async fn update_settings(&self, settings: &StoreSettings) -> EngineResult<()> {
        if settings.referral_bonus_amount < 0 {
            return Err(market_core::CoreError::InvalidAmount {
                amount: settings.referral_bonus_amount,
            }
            .into());
        }
        self.db.settings().save(settings, Utc::now()).await?;
        Ok(())
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub fn carts(&self) -> &CartStaging {
        &self.carts
    }

    pub fn balances(&self) -> &AccountBalance {
        &self.balances
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn artifacts(&self) -> &OrderArtifactGenerator {
        &self.artifacts
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seed_variant;
    use market_core::{CoreError, LedgerKind, PointsRate};

    #[tokio::test]
    async fn test_storefront_flow() {
        let market = Market::in_memory().await.unwrap();
        let spinach = seed_variant(market.database(), "Fresh Spinach", 2500, 5).await;

        let referrer = market
            .register_account(NewAccount::new("referrer"), None)
            .await
            .unwrap()
            .account;
        let shopper = market
            .register_account(NewAccount::new("shopper"), None)
            .await
            .unwrap()
            .account;

        let outcome = market
            .apply_referral(&shopper.id, &referrer.referral_code)
            .await
            .unwrap();
        assert!(outcome.is_applied());

        // Top up to 100 points
        market
            .balances()
            .credit(&shopper.id, 50, LedgerKind::Referral, "goodwill")
            .await
            .unwrap();
        assert_eq!(market.query_balance(&shopper.id).await.unwrap(), 100);

        market.carts().add_item(&shopper.id, &spinach, 2).await.unwrap();
        let receipt = market.submit_checkout(&shopper.id, 100).await.unwrap();
        assert_eq!(receipt.order.total_amount_cents, 4000);
        assert_eq!(market.query_balance(&shopper.id).await.unwrap(), 10);

        let ledger = market.query_ledger(&shopper.id, 10).await.unwrap();
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger[0].kind, LedgerKind::Earned);
        let sum: i64 = ledger.iter().map(|e| e.delta).sum();
        assert_eq!(sum, 10);
        assert!(market.reconcile(&shopper.id).await.unwrap().is_consistent());

        let summary = market
            .payment_summary(&receipt.order.order_number)
            .await
            .unwrap();
        let reference = summary.artifact.unwrap().reference;
        assert!(market
            .verify_artifact(&receipt.order.order_number, &reference)
            .await
            .unwrap());

        let processing = market
            .update_order_status(&receipt.order.order_number, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(processing.status, OrderStatus::Processing);

        // Retrying a checkout that already committed finds an empty cart
        let err = market.submit_checkout(&shopper.id, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_config_seeds_settings_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut config = MarketConfig::default();
        config.store.points_to_currency_rate = "0.25".to_string();
        let market = Market::with_database(db.clone(), config).await.unwrap();
        assert_eq!(
            market.settings().await.unwrap().points_to_currency_rate,
            PointsRate::from_minor_per_point(25)
        );

        // A second open with different config keeps the stored row
        let market = Market::with_database(db, MarketConfig::default()).await.unwrap();
        assert_eq!(
            market.settings().await.unwrap().points_to_currency_rate,
            PointsRate::from_minor_per_point(25)
        );
    }

    #[tokio::test]
    async fn test_update_settings() {
        let market = Market::in_memory().await.unwrap();
        let mut settings = market.settings().await.unwrap();
        settings.referral_bonus_amount = -1;
        assert_eq!(
            market.update_settings(&settings).await.unwrap_err().code(),
            ErrorCode::InvalidAmount
        );

        settings.referral_bonus_amount = 75;
        market.update_settings(&settings).await.unwrap();
        assert_eq!(market.settings().await.unwrap().referral_bonus_amount, 75);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MarketConfig::default();
        config.database.path = Some(dir.path().join("market.db"));

        let market = Market::open(config).await.unwrap();
        let account = market
            .register_account(NewAccount::new("file-user"), None)
            .await
            .unwrap()
            .account;
        assert_eq!(market.query_balance(&account.id).await.unwrap(), 0);
        market.close().await;
    }
}
