//! # Account Repository
//!
//! Account rows and their point balances.
//!
//! ## Balance Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every balance change runs inside a caller-owned transaction:          │
//! │                                                                         │
//! │  lock_for_update(id)        UPDATE … RETURNING  (takes write lock)     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  debit(id, n)               UPDATE … WHERE points >= n                 │
//! │  credit(id, n)              UPDATE … points + n                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerRepository::append   same transaction                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Methods taking `&mut SqliteConnection` are meant to run on a
//! transaction's connection; methods on `&self` use the pool.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use market_core::{Account, Reconciliation};

const ACCOUNT_COLUMNS: &str = "id, external_ref, member_number, phone_number, address, \
     points, referral_code, referred_by, version, created_at, updated_at";

/// Repository for account database operations.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    // =========================================================================
    // Pool reads
    // =========================================================================

    /// Gets an account by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Account>> {
        let mut conn = self.pool.acquire().await?;
        Self::find(&mut conn, id).await
    }

    /// Gets an account by its identity-provider subject.
    pub async fn get_by_external_ref(&self, external_ref: &str) -> DbResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE external_ref = ?1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    /// Current balance.
    pub async fn balance(&self, id: &str) -> DbResult<i64> {
        let points: Option<i64> = sqlx::query_scalar("SELECT points FROM accounts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        points.ok_or_else(|| DbError::not_found("Account", id))
    }

    /// Stored balance next to the sum of the account's ledger deltas,
    /// read in one statement so both come from the same snapshot.
    pub async fn reconcile(&self, id: &str) -> DbResult<Reconciliation> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                a.points,
                COALESCE((SELECT SUM(l.delta) FROM ledger_entries l WHERE l.account_id = a.id), 0)
            FROM accounts a
            WHERE a.id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (stored_balance, ledger_sum) = row.ok_or_else(|| DbError::not_found("Account", id))?;
        Ok(Reconciliation {
            stored_balance,
            ledger_sum,
        })
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    /// Gets an account on the given connection.
    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(account)
    }

    /// Resolves a referral code to its owner.
    pub async fn find_by_referral_code(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> DbResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE referral_code = ?1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(account)
    }

    /// Inserts a new account row.
    pub async fn insert(conn: &mut SqliteConnection, account: &Account) -> DbResult<()> {
        debug!(id = %account.id, member_number = %account.member_number, "Inserting account");

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, external_ref, member_number, phone_number, address,
                points, referral_code, referred_by, version,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11
            )
            "#,
        )
        .bind(&account.id)
        .bind(&account.external_ref)
        .bind(&account.member_number)
        .bind(&account.phone_number)
        .bind(&account.address)
        .bind(account.points)
        .bind(&account.referral_code)
        .bind(&account.referred_by)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes the write lock for an account and returns its current row.
    ///
    /// Must be the first statement of the transaction: later reads then see
    /// the latest committed balance and no other writer can interleave.
    pub async fn lock_for_update(
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Account> {
        let sql = format!(
            "UPDATE accounts SET updated_at = ?1 WHERE id = ?2 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(now)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        account.ok_or_else(|| DbError::not_found("Account", id))
    }

    /// Adds points. Returns the new balance.
    pub async fn credit(
        conn: &mut SqliteConnection,
        id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts SET
                points = points + ?1,
                version = version + 1,
                updated_at = ?2
            WHERE id = ?3
            RETURNING points
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        balance.ok_or_else(|| DbError::not_found("Account", id))
    }

    /// Removes points if the balance covers them.
    ///
    /// Returns the new balance, or `None` when the balance is too low (or the
    /// account is gone). The check and the update are one statement.
    pub async fn debit(
        conn: &mut SqliteConnection,
        id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Option<i64>> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts SET
                points = points - ?1,
                version = version + 1,
                updated_at = ?2
            WHERE id = ?3 AND points >= ?1
            RETURNING points
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(balance)
    }

    /// Records the referrer if none is recorded yet.
    ///
    /// Returns `false` when the account already has a referrer.
    pub async fn set_referrer_once(
        conn: &mut SqliteConnection,
        id: &str,
        referrer_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                referred_by = ?1,
                updated_at = ?2
            WHERE id = ?3 AND referred_by IS NULL
            "#,
        )
        .bind(referrer_id)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use uuid::Uuid;

    fn account(code: &str) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4().to_string(),
            external_ref: format!("user-{}", code),
            member_number: format!("M{}00", code),
            phone_number: None,
            address: None,
            points: 0,
            referral_code: code.to_string(),
            referred_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_credit_and_conditional_debit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let acc = account("AAA111");

        let mut tx = db.begin().await.unwrap();
        AccountRepository::insert(&mut tx, &acc).await.unwrap();
        let balance = AccountRepository::credit(&mut tx, &acc.id, 100, Utc::now()).await.unwrap();
        assert_eq!(balance, 100);

        let over = AccountRepository::debit(&mut tx, &acc.id, 101, Utc::now()).await.unwrap();
        assert_eq!(over, None);

        let after = AccountRepository::debit(&mut tx, &acc.id, 60, Utc::now()).await.unwrap();
        assert_eq!(after, Some(40));
        tx.commit().await.unwrap();

        let repo = db.accounts();
        assert_eq!(repo.balance(&acc.id).await.unwrap(), 40);
        assert_eq!(repo.get_by_id(&acc.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_lock_for_update_missing_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let err = AccountRepository::lock_for_update(&mut tx, "nope", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_referrer_recorded_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let referrer = account("REF001");
        let referee = account("NEW001");

        let mut tx = db.begin().await.unwrap();
        AccountRepository::insert(&mut tx, &referrer).await.unwrap();
        AccountRepository::insert(&mut tx, &referee).await.unwrap();

        assert!(AccountRepository::set_referrer_once(&mut tx, &referee.id, &referrer.id, Utc::now())
            .await
            .unwrap());
        assert!(!AccountRepository::set_referrer_once(&mut tx, &referee.id, &referrer.id, Utc::now())
            .await
            .unwrap());

        let found = AccountRepository::find_by_referral_code(&mut tx, "REF001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, referrer.id);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_referral_code_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let first = account("DUP123");
        let mut second = account("DUP123");
        second.external_ref = "someone-else".to_string();
        second.member_number = "M9999999".to_string();

        let mut tx = db.begin().await.unwrap();
        AccountRepository::insert(&mut tx, &first).await.unwrap();
        let err = AccountRepository::insert(&mut tx, &second).await.unwrap_err();
        assert!(err.is_unique_violation_on("referral_code"));
    }
}
