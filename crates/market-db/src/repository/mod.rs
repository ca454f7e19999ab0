//! # Repository Module
//!
//! Database repository implementations for the points engine.
//!
//! ## Two Kinds of Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  &self methods            read-only or single-statement, use the pool  │
//! │  ───────────────          db.ledger().recent(account, 10)              │
//! │                                                                         │
//! │  associated fns           take &mut SqliteConnection so several        │
//! │  ───────────────          repositories share one transaction           │
//! │                                                                         │
//! │      let mut tx = db.begin().await?;                                   │
//! │      AccountRepository::lock_for_update(&mut tx, id, now).await?;      │
//! │      AccountRepository::debit(&mut tx, id, 100, now).await?;           │
//! │      LedgerRepository::append(&mut tx, id, -100, …).await?;            │
//! │      tx.commit().await?;                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`AccountRepository`](account::AccountRepository) - Accounts and balances
//! - [`LedgerRepository`](ledger::LedgerRepository) - Append-only point history
//! - [`CartRepository`](cart::CartRepository) - Staged cart lines
//! - [`CatalogRepository`](catalog::CatalogRepository) - Products and variants
//! - [`OrderRepository`](order::OrderRepository) - Orders and frozen lines
//! - [`ArtifactRepository`](artifact::ArtifactRepository) - Payment references
//! - [`SettingsRepository`](settings::SettingsRepository) - Store settings row

pub mod account;
pub mod artifact;
pub mod cart;
pub mod catalog;
pub mod ledger;
pub mod order;
pub mod settings;
