//! # Catalog Repository
//!
//! Products and their package variants.
//!
//! ## Lookup Contract
//! ```text
//! get_variant(id)
//!      │
//!      ├── variant exists AND product is_active → Some(CatalogVariant)
//!      └── otherwise                            → None (VariantNotFound upstream)
//! ```
//!
//! The price returned is whatever the catalog says *now*. Carts read it live;
//! checkout freezes it into order lines.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use market_core::{CatalogVariant, Product, ProductVariant};

const CATALOG_VARIANT_SELECT: &str = r#"
    SELECT
        v.id AS variant_id,
        p.id AS product_id,
        p.name AS product_name,
        v.weight AS weight,
        v.price_cents AS unit_price_cents,
        p.points_per_unit AS points_per_unit
    FROM product_variants v
    JOIN products p ON p.id = v.product_id
"#;

/// Repository for catalog reads and administration.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Resolves an active variant on the given connection.
    pub async fn get_variant(
        conn: &mut SqliteConnection,
        variant_id: &str,
    ) -> DbResult<Option<CatalogVariant>> {
        let sql = format!("{} WHERE v.id = ?1 AND p.is_active = 1", CATALOG_VARIANT_SELECT);
        let variant = sqlx::query_as::<_, CatalogVariant>(&sql)
            .bind(variant_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(variant)
    }

    /// Every active variant, grouped by product name.
    pub async fn list_active_variants(&self) -> DbResult<Vec<CatalogVariant>> {
        let sql = format!(
            "{} WHERE p.is_active = 1 ORDER BY p.name, v.price_cents",
            CATALOG_VARIANT_SELECT
        );
        let variants = sqlx::query_as::<_, CatalogVariant>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(variants)
    }

    /// Number of products, active or not.
    pub async fn count_products(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Gets a product by ID.
    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, category_type, description, base_price_cents,
                   points_per_unit, is_active, created_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    /// Inserts a product.
    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, category_type, description, base_price_cents,
                points_per_unit, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.category_type)
        .bind(&product.description)
        .bind(product.base_price_cents)
        .bind(product.points_per_unit)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a package variant of an existing product.
    pub async fn insert_variant(&self, variant: &ProductVariant) -> DbResult<()> {
        debug!(id = %variant.id, product_id = %variant.product_id, "Inserting variant");

        sqlx::query(
            r#"
            INSERT INTO product_variants (
                id, product_id, package_type, weight, price_cents, stock_quantity
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&variant.id)
        .bind(&variant.product_id)
        .bind(variant.package_type)
        .bind(&variant.weight)
        .bind(variant.price_cents)
        .bind(variant.stock_quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Changes the selling price of a variant.
    ///
    /// Affects carts immediately; committed orders keep their frozen price.
    pub async fn set_variant_price(&self, variant_id: &str, price_cents: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE product_variants SET price_cents = ?1 WHERE id = ?2")
            .bind(price_cents)
            .bind(variant_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ProductVariant", variant_id));
        }
        Ok(())
    }

    /// Withdraws a product from sale (soft delete) or restores it.
    pub async fn set_product_active(&self, product_id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }
        Ok(())
    }
}
