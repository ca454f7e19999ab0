//! # Ledger Repository
//!
//! Append-only store of point-change records. There is no update or delete
//! path here, and triggers in the schema reject both.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use market_core::{LedgerEntry, LedgerKind};

/// Repository for the points ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Most recent entries first, at most `limit`.
    ///
    /// Entries written in the same instant keep their insertion order
    /// (newest first) through the rowid tie-break.
    pub async fn recent(&self, account_id: &str, limit: i64) -> DbResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, account_id, delta, kind, reason, created_at
            FROM ledger_entries
            WHERE account_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Number of entries for an account.
    pub async fn count(&self, account_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE account_id = ?1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Appends one entry on the caller's transaction.
    ///
    /// The caller is responsible for applying the same `delta` to the
    /// account balance in that transaction.
    pub async fn append(
        conn: &mut SqliteConnection,
        account_id: &str,
        delta: i64,
        kind: LedgerKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<LedgerEntry> {
        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            delta,
            kind,
            reason: reason.to_string(),
            created_at: now,
        };

        debug!(account_id = %account_id, delta, kind = %kind, "Appending ledger entry");

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, account_id, delta, kind, reason, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(entry.delta)
        .bind(entry.kind)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }
}
