//! Fixtures shared by the engine's unit tests.

use chrono::Utc;
use uuid::Uuid;

use crate::balance::credit_in;
use market_core::{Account, CategoryType, LedgerKind, PackageType, Product, ProductVariant};
use market_db::{Database, DbConfig};

pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// Inserts an account with a zero balance.
pub(crate) async fn seed_account(db: &Database, external_ref: &str) -> Account {
    let now = Utc::now();
    let key = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    let account = Account {
        id: Uuid::new_v4().to_string(),
        external_ref: external_ref.to_string(),
        member_number: key[..8].to_string(),
        phone_number: None,
        address: None,
        points: 0,
        referral_code: key[8..14].to_string(),
        referred_by: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let mut conn = db.pool().acquire().await.unwrap();
    market_db::AccountRepository::insert(&mut conn, &account)
        .await
        .unwrap();
    account
}

/// Credits `amount` referral points so checkouts have something to redeem.
pub(crate) async fn grant_points(db: &Database, account_id: &str, amount: i64) {
    let mut tx = db.begin().await.unwrap();
    credit_in(&mut tx, account_id, amount, LedgerKind::Referral, "test grant", Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

/// Inserts an active product with one medium package and returns the
/// variant id.
pub(crate) async fn seed_variant(
    db: &Database,
    name: &str,
    price_cents: i64,
    points_per_unit: i64,
) -> String {
    let catalog = db.catalog();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        category_type: CategoryType::Vegetable,
        description: String::new(),
        base_price_cents: price_cents,
        points_per_unit,
        is_active: true,
        created_at: Utc::now(),
    };
    catalog.insert_product(&product).await.unwrap();

    let variant = ProductVariant {
        id: Uuid::new_v4().to_string(),
        product_id: product.id.clone(),
        package_type: PackageType::Medium,
        weight: "500g".to_string(),
        price_cents,
        stock_quantity: 50,
    };
    catalog.insert_variant(&variant).await.unwrap();
    variant.id
}

/// Product id behind a variant, for deactivation tests.
pub(crate) async fn product_of(db: &Database, variant_id: &str) -> String {
    sqlx::query_scalar("SELECT product_id FROM product_variants WHERE id = ?1")
        .bind(variant_id)
        .fetch_one(db.pool())
        .await
        .unwrap()
}
