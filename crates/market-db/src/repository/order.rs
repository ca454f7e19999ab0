//! # Order Repository
//!
//! Database operations for orders and order lines.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CHECKOUT (one transaction)                                         │
//! │     └── insert() → Order { status: Pending }                           │
//! │     └── insert_line() × N  (prices frozen)                             │
//! │                                                                         │
//! │  2. AFTER COMMIT                                                       │
//! │     └── attach_artifact_ref() → payment reference                      │
//! │                                                                         │
//! │  3. FULFILMENT                                                         │
//! │     └── update_status() pending → processing → shipped → delivered     │
//! │     └── update_status() pending|processing → cancelled                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use market_core::{Order, OrderLine, OrderStatus};

const ORDER_COLUMNS: &str = "id, order_number, account_id, subtotal_cents, total_amount_cents, \
     currency_code, points_redeemed, points_discount_cents, points_earned, status, artifact_ref, \
     created_at, updated_at";

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by its business number.
    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE order_number = ?1", ORDER_COLUMNS);
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Gets all lines of an order.
    pub async fn get_lines(&self, order_id: &str) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT id, order_id, variant_id, name_snapshot, quantity,
                   unit_price_cents, line_total_cents, created_at
            FROM order_lines
            WHERE order_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    /// Orders of an account, most recent first.
    pub async fn list_for_account(&self, account_id: &str, limit: i64) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE account_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            ORDER_COLUMNS
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(account_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// Committed orders that still have no payment reference, oldest first.
    pub async fn without_artifact(&self, limit: i64) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE artifact_ref IS NULL \
             ORDER BY created_at, rowid LIMIT ?1",
            ORDER_COLUMNS
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// Moves an order from `from` to `to` if it is still in `from`.
    ///
    /// Returns `false` when the order changed underneath the caller.
    pub async fn update_status(
        &self,
        order_number: &str,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(order_number = %order_number, from = %from, to = %to, "Updating order status");

        let result = sqlx::query(
            r#"
            UPDATE orders SET status = ?1, updated_at = ?2
            WHERE order_number = ?3 AND status = ?4
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(order_number)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Inserts an order header on the checkout transaction.
    pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, order_number = %order.order_number, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, account_id,
                subtotal_cents, total_amount_cents, currency_code,
                points_redeemed, points_discount_cents, points_earned,
                status, artifact_ref, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3,
                ?4, ?5, ?6,
                ?7, ?8, ?9,
                ?10, ?11, ?12, ?13
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.account_id)
        .bind(order.subtotal_cents)
        .bind(order.total_amount_cents)
        .bind(&order.currency_code)
        .bind(order.points_redeemed)
        .bind(order.points_discount_cents)
        .bind(order.points_earned)
        .bind(order.status)
        .bind(&order.artifact_ref)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts an order line.
    ///
    /// ## Snapshot Pattern
    /// Product name and unit price are copied onto the line so the order
    /// keeps its history when the catalog changes.
    pub async fn insert_line(conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, variant_id, name_snapshot, quantity,
                unit_price_cents, line_total_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&line.id)
        .bind(&line.order_id)
        .bind(&line.variant_id)
        .bind(&line.name_snapshot)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.line_total_cents)
        .bind(line.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Records the payment reference on an order that has none yet.
    pub async fn attach_artifact_ref(
        conn: &mut SqliteConnection,
        order_id: &str,
        reference: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET artifact_ref = ?1 WHERE id = ?2 AND artifact_ref IS NULL",
        )
        .bind(reference)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Generates an order number: `ORD` + UTC timestamp + 6 random hex chars.
///
/// ## Example
/// `ORD20260131143015-9F3A1C`
///
/// The random suffix keeps numbers unique within the same second; the
/// UNIQUE index on `orders.order_number` catches the remaining collisions.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ORD{}-{}",
        now.format("%Y%m%d%H%M%S"),
        suffix[..6].to_ascii_uppercase()
    )
}

/// Generates a new order line ID.
pub fn generate_order_line_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_number_format() {
        let at = Utc.with_ymd_and_hms(2026, 1, 31, 14, 30, 15).unwrap();
        let number = generate_order_number(at);
        assert!(number.starts_with("ORD20260131143015-"));
        assert_eq!(number.len(), "ORD20260131143015-".len() + 6);
        assert!(number[18..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_order_numbers_differ_within_a_second() {
        let at = Utc::now();
        assert_ne!(generate_order_number(at), generate_order_number(at));
    }
}
