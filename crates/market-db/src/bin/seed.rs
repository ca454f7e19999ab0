//! # Seed Data Generator
//!
//! Populates a database with the storefront's starter catalog and settings.
//!
//! ## Usage
//! ```bash
//! # Seed ./market_dev.db
//! cargo run -p market-db --bin seed
//!
//! # Specify database path
//! cargo run -p market-db --bin seed -- --db ./data/market.db
//! ```
//!
//! ## Generated Data
//! - Store settings: 0.10 per point, 50 referral points, bank details
//! - Fresh Spinach (vegetable, 25.00, 5 pts/unit)
//! - Sweet Mango (fruit, 45.00, 8 pts/unit)
//!
//! Each product gets five packages priced from its base price:
//! small ×0.8, medium ×1, large ×1.8, extra large ×3.5, family pack ×8.

use chrono::Utc;
use std::env;
use uuid::Uuid;

use market_core::{
    CategoryType, Money, PackageType, PointsRate, Product, ProductVariant, StoreSettings,
};
use market_db::{Database, DbConfig};

/// (name, category, description, base price in minor units, points per unit)
const PRODUCTS: &[(&str, CategoryType, &str, i64, i64)] = &[
    (
        "Fresh Spinach",
        CategoryType::Vegetable,
        "Fresh organic spinach leaves, perfect for salads and cooking.",
        2500,
        5,
    ),
    (
        "Sweet Mango",
        CategoryType::Fruit,
        "Sweet tropical mango, rich in vitamins and perfect for desserts.",
        4500,
        8,
    ),
];

/// (package, weight label, price multiplier in basis points)
const PACKAGES: &[(PackageType, &str, u32)] = &[
    (PackageType::Small, "250g", 8_000),
    (PackageType::Medium, "500g", 10_000),
    (PackageType::Large, "1kg", 18_000),
    (PackageType::ExtraLarge, "2kg", 35_000),
    (PackageType::FamilyPack, "5kg", 80_000),
];

const STOCK_PER_PACKAGE: i64 = 50;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./market_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Fresh Market Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./market_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Fresh Market Seed Data Generator");
    println!("===================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let settings = StoreSettings {
        company_name: "Fresh Market".to_string(),
        bank_name: "Bangkok Bank".to_string(),
        bank_account_name: "Fresh Market Co., Ltd.".to_string(),
        bank_account_number: "123-456-7890".to_string(),
        points_to_currency_rate: PointsRate::from_minor_per_point(10),
        referral_bonus_amount: 50,
        currency_code: "THB".to_string(),
    };
    db.settings().save(&settings, Utc::now()).await?;
    println!("✓ Store settings saved");

    let catalog = db.catalog();
    let existing = catalog.count_products().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping catalog seed to avoid duplicates.");
        return Ok(());
    }

    let mut variants = 0;
    for (name, category, description, base_price, points) in PRODUCTS {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            category_type: *category,
            description: description.to_string(),
            base_price_cents: *base_price,
            points_per_unit: *points,
            is_active: true,
            created_at: Utc::now(),
        };
        catalog.insert_product(&product).await?;

        for (package, weight, bps) in PACKAGES {
            let variant = ProductVariant {
                id: Uuid::new_v4().to_string(),
                product_id: product.id.clone(),
                package_type: *package,
                weight: weight.to_string(),
                price_cents: Money::from_cents(*base_price).scale_bps(*bps).cents(),
                stock_quantity: STOCK_PER_PACKAGE,
            };
            catalog.insert_variant(&variant).await?;
            variants += 1;
        }

        println!("  ✓ {} ({} pts/unit)", product.name, product.points_per_unit);
    }

    println!();
    println!("✓ Generated {} products, {} packages", PRODUCTS.len(), variants);

    for variant in catalog.list_active_variants().await? {
        println!(
            "  {:<14} {:>5}  {:>8}",
            variant.product_name,
            variant.weight,
            variant.unit_price().to_string()
        );
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
