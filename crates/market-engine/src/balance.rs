//! # Account Balance
//!
//! Credits and debits of loyalty points. Every change is one ledger entry
//! plus one balance update, written on the same transaction.
//!
//! ## Atomicity
//! ```text
//! BEGIN
//!   UPDATE accounts ... RETURNING     (takes the write lock)
//!   UPDATE accounts SET points = points ± n
//!   INSERT INTO ledger_entries (delta = ±n)
//! COMMIT                              (both or neither)
//! ```
//!
//! Checkout and referral reuse [`credit_in`] / [`debit_in`] on their own
//! transactions; [`AccountBalance`] wraps them in a standalone unit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::config::CheckoutSettings;
use crate::error::EngineResult;
use crate::retry::with_retry;
use market_core::validation::{validate_limit, validate_point_amount};
use market_core::{CoreError, LedgerEntry, LedgerKind, Reconciliation};
use market_db::{AccountRepository, Database, DbError, LedgerRepository};

/// Result of one balance change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub entry: LedgerEntry,
    /// Balance after the change.
    pub balance: i64,
}

/// Adds `amount` points on the caller's transaction.
pub(crate) async fn credit_in(
    conn: &mut SqliteConnection,
    account_id: &str,
    amount: i64,
    kind: LedgerKind,
    reason: &str,
    now: DateTime<Utc>,
) -> EngineResult<BalanceChange> {
    validate_point_amount(amount)?;

    let balance = AccountRepository::credit(conn, account_id, amount, now)
        .await
        .map_err(|e| missing_account(e, account_id))?;
    let entry = LedgerRepository::append(conn, account_id, amount, kind, reason, now).await?;

    debug!(account_id = %account_id, amount, kind = %kind, balance, "Points credited");
    Ok(BalanceChange { entry, balance })
}

/// Removes `amount` points on the caller's transaction.
///
/// Fails with `InsufficientBalance` without writing anything when the
/// balance does not cover `amount`.
pub(crate) async fn debit_in(
    conn: &mut SqliteConnection,
    account_id: &str,
    amount: i64,
    kind: LedgerKind,
    reason: &str,
    now: DateTime<Utc>,
) -> EngineResult<BalanceChange> {
    validate_point_amount(amount)?;

    let Some(balance) = AccountRepository::debit(conn, account_id, amount, now).await? else {
        let account = AccountRepository::find(conn, account_id)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;
        return Err(CoreError::InsufficientBalance {
            account_id: account_id.to_string(),
            balance: account.points,
            requested: amount,
        }
        .into());
    };
    let entry = LedgerRepository::append(conn, account_id, -amount, kind, reason, now).await?;

    debug!(account_id = %account_id, amount, kind = %kind, balance, "Points debited");
    Ok(BalanceChange { entry, balance })
}

/// Maps a repository `NotFound` for the account onto the domain error.
pub(crate) fn missing_account(err: DbError, account_id: &str) -> crate::error::EngineError {
    match err {
        DbError::NotFound { .. } => CoreError::AccountNotFound(account_id.to_string()).into(),
        other => other.into(),
    }
}

/// Standalone balance operations.
#[derive(Debug, Clone)]
pub struct AccountBalance {
    db: Database,
    policy: CheckoutSettings,
}

impl AccountBalance {
    pub fn new(db: Database, policy: CheckoutSettings) -> Self {
        AccountBalance { db, policy }
    }

    /// Credits points in its own atomic unit.
    pub async fn credit(
        &self,
        account_id: &str,
        amount: i64,
        kind: LedgerKind,
        reason: &str,
    ) -> EngineResult<BalanceChange> {
        validate_point_amount(amount)?;
        let change = with_retry("credit", &self.policy, move || {
            self.apply(account_id, amount, kind, reason, true)
        })
        .await?;

        info!(account_id = %account_id, amount, kind = %kind, balance = change.balance, "Credit committed");
        Ok(change)
    }

    /// Debits points in its own atomic unit.
    pub async fn debit(
        &self,
        account_id: &str,
        amount: i64,
        kind: LedgerKind,
        reason: &str,
    ) -> EngineResult<BalanceChange> {
        validate_point_amount(amount)?;
        let change = with_retry("debit", &self.policy, move || {
            self.apply(account_id, amount, kind, reason, false)
        })
        .await?;

        info!(account_id = %account_id, amount, kind = %kind, balance = change.balance, "Debit committed");
        Ok(change)
    }

    async fn apply(
        &self,
        account_id: &str,
        amount: i64,
        kind: LedgerKind,
        reason: &str,
        credit: bool,
    ) -> EngineResult<BalanceChange> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        AccountRepository::lock_for_update(&mut tx, account_id, now)
            .await
            .map_err(|e| missing_account(e, account_id))?;

        let change = if credit {
            credit_in(&mut tx, account_id, amount, kind, reason, now).await?
        } else {
            debit_in(&mut tx, account_id, amount, kind, reason, now).await?
        };

        tx.commit().await.map_err(DbError::from)?;
        Ok(change)
    }

    /// Current point balance.
    pub async fn balance(&self, account_id: &str) -> EngineResult<i64> {
        self.db
            .accounts()
            .balance(account_id)
            .await
            .map_err(|e| missing_account(e, account_id))
    }

    /// Most recent ledger entries first, at most `limit`.
    pub async fn ledger(&self, account_id: &str, limit: i64) -> EngineResult<Vec<LedgerEntry>> {
        validate_limit(limit)?;
        if self.db.accounts().get_by_id(account_id).await?.is_none() {
            return Err(CoreError::AccountNotFound(account_id.to_string()).into());
        }
        Ok(self.db.ledger().recent(account_id, limit).await?)
    }

    /// Stored balance next to the ledger sum.
    pub async fn reconcile(&self, account_id: &str) -> EngineResult<Reconciliation> {
        self.db
            .accounts()
            .reconcile(account_id)
            .await
            .map_err(|e| missing_account(e, account_id))
    }
}
