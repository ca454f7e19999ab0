//! # market-db
//!
//! SQLite storage for the points engine: accounts and their append-only
//! ledger, carts, the product catalog, orders with their payment artifacts,
//! and the single store-settings row.
//!
//! ```text
//!   market-engine
//!        │  Database::begin() ─► Transaction ─► Repo::fn(&mut *tx, ..)
//!        │  db.ledger().recent(..)            (pool reads)
//!        ▼
//!   Database ── SqlitePool (WAL, busy_timeout, foreign_keys)
//!        │
//!        └── migrations/sqlite/*.sql, embedded at compile time
//! ```
//!
//! Repositories come in two flavours of method. Methods on `&self` run a
//! single statement against the pool. Associated functions taking a
//! `&mut SqliteConnection` run inside a caller's transaction, which is how
//! the engine groups several writes into one atomic unit.
//!
//! ```rust,ignore
//! use market_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("market.db")).await?;
//! let history = db.ledger().recent(&account_id, 10).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbLocation};

pub use repository::account::AccountRepository;
pub use repository::artifact::{ArtifactRepository, StoredArtifact};
pub use repository::cart::{CartRepository, CartRow};
pub use repository::catalog::CatalogRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::order::{generate_order_line_id, generate_order_number, OrderRepository};
pub use repository::settings::SettingsRepository;
