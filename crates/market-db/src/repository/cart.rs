//! # Cart Repository
//!
//! Per-account staging of (variant, quantity) lines before checkout.
//! Prices are never stored here; they are joined from the catalog on read.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use market_core::{CartLine, CatalogVariant, PricedCartLine};

/// A cart line joined with its current catalog entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CartRow {
    pub variant_id: String,
    pub product_id: String,
    pub product_name: String,
    pub weight: String,
    pub unit_price_cents: i64,
    pub points_per_unit: i64,
    /// False once the product has been withdrawn from sale.
    pub is_active: bool,
    pub quantity: i64,
}

impl From<CartRow> for PricedCartLine {
    fn from(row: CartRow) -> Self {
        PricedCartLine {
            variant: CatalogVariant {
                variant_id: row.variant_id,
                product_id: row.product_id,
                product_name: row.product_name,
                weight: row.weight,
                unit_price_cents: row.unit_price_cents,
                points_per_unit: row.points_per_unit,
            },
            quantity: row.quantity,
        }
    }
}

/// Repository for cart lines.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Raw cart lines for an account, oldest first.
    pub async fn lines(&self, account_id: &str) -> DbResult<Vec<CartLine>> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"
            SELECT account_id, variant_id, quantity, added_at, updated_at
            FROM cart_lines
            WHERE account_id = ?1
            ORDER BY added_at, rowid
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Cart lines joined with live catalog data, oldest first.
    pub async fn priced_lines(
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> DbResult<Vec<CartRow>> {
        let rows = sqlx::query_as::<_, CartRow>(
            r#"
            SELECT
                v.id AS variant_id,
                p.id AS product_id,
                p.name AS product_name,
                v.weight AS weight,
                v.price_cents AS unit_price_cents,
                p.points_per_unit AS points_per_unit,
                p.is_active AS is_active,
                c.quantity AS quantity
            FROM cart_lines c
            JOIN product_variants v ON v.id = c.variant_id
            JOIN products p ON p.id = v.product_id
            WHERE c.account_id = ?1
            ORDER BY c.added_at, c.rowid
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Quantity of one variant in the cart, if present.
    pub async fn quantity_of(
        conn: &mut SqliteConnection,
        account_id: &str,
        variant_id: &str,
    ) -> DbResult<Option<i64>> {
        let qty: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM cart_lines WHERE account_id = ?1 AND variant_id = ?2",
        )
        .bind(account_id)
        .bind(variant_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(qty)
    }

    /// Number of distinct lines.
    pub async fn line_count(conn: &mut SqliteConnection, account_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_lines WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Adds `quantity` to the line, creating it if absent.
    /// Returns the resulting quantity.
    pub async fn add_quantity(
        conn: &mut SqliteConnection,
        account_id: &str,
        variant_id: &str,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        debug!(account_id = %account_id, variant_id = %variant_id, quantity, "Adding to cart");

        let total: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO cart_lines (account_id, variant_id, quantity, added_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (account_id, variant_id) DO UPDATE SET
                quantity = quantity + excluded.quantity,
                updated_at = excluded.updated_at
            RETURNING quantity
            "#,
        )
        .bind(account_id)
        .bind(variant_id)
        .bind(quantity)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(total)
    }

    /// Overwrites the quantity of an existing line.
    /// Returns `false` if the line does not exist.
    pub async fn set_quantity(
        conn: &mut SqliteConnection,
        account_id: &str,
        variant_id: &str,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cart_lines SET quantity = ?1, updated_at = ?2
            WHERE account_id = ?3 AND variant_id = ?4
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(account_id)
        .bind(variant_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes one line. Returns `false` if it did not exist.
    pub async fn remove(
        conn: &mut SqliteConnection,
        account_id: &str,
        variant_id: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE account_id = ?1 AND variant_id = ?2")
            .bind(account_id)
            .bind(variant_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes every line of the account's cart. Returns lines removed.
    pub async fn clear(conn: &mut SqliteConnection, account_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE account_id = ?1")
            .bind(account_id)
            .execute(&mut *conn)
            .await?;

        debug!(account_id = %account_id, removed = result.rows_affected(), "Cart cleared");
        Ok(result.rows_affected())
    }
}
