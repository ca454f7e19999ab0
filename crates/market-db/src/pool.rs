//! # Connection Pool
//!
//! Opens the SQLite database behind the points engine and hands out
//! repositories and transactions.
//!
//! ## Writers and Locks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   One Writer at a Time (WAL journal)                    │
//! │                                                                         │
//! │  checkout A ─► conn 1 ─► BEGIN ─► UPDATE accounts … ─► … ─► COMMIT     │
//! │                                   (write lock taken)                    │
//! │                                                                         │
//! │  checkout B ─► conn 2 ─► BEGIN ─► UPDATE accounts …                    │
//! │                                   │                                     │
//! │                                   ├─ lock freed within busy_timeout    │
//! │                                   │     → proceeds on fresh data        │
//! │                                   └─ still held after busy_timeout     │
//! │                                         → SQLITE_BUSY → DbError::Busy  │
//! │                                                                         │
//! │  balance / ledger reads ─► any conn, never blocked by the writer       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::account::AccountRepository;
use crate::repository::artifact::ArtifactRepository;
use crate::repository::cart::CartRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::ledger::LedgerRepository;
use crate::repository::order::OrderRepository;
use crate::repository::settings::SettingsRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A database file, created on first open.
    File(PathBuf),
    /// A private in-memory database that disappears with the pool.
    Memory,
}

/// Pool settings.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/market/market.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,

    /// Default: 5. Always 1 for [`DbLocation::Memory`].
    pub max_connections: u32,

    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,

    /// How long a writer waits for the lock before `SQLITE_BUSY`.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Apply embedded migrations on open. Default: true
    pub migrate: bool,
}

impl DbConfig {
    /// Configuration for a database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// Configuration for tests.
    ///
    /// Every connection to `:memory:` would see its own empty database, so
    /// the pool is held at one connection. Code under test must run every
    /// statement of a transaction on the transaction's connection.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            migrate: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            DbLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            DbLocation::Memory => SqliteConnectOptions::new()
                .in_memory(true)
                .journal_mode(SqliteJournalMode::Memory),
        };

        options
            .synchronous(SqliteSynchronous::Normal)
            // Off by default in SQLite
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }

    fn pool_size(&self) -> u32 {
        match self.location {
            DbLocation::Memory => 1,
            DbLocation::File(_) => self.max_connections.max(1),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the pool. Clones share it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(location = ?config.location, "Opening market database");

        let size = config.pool_size();
        let pool = SqlitePoolOptions::new()
            .max_connections(size)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            // The in-memory database lives only as long as its connection
            .idle_timeout(match config.location {
                DbLocation::Memory => None,
                DbLocation::File(_) => Some(Duration::from_secs(600)),
            })
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(max_connections = size, busy_timeout = ?config.busy_timeout, "Pool ready");

        let db = Database { pool };
        if config.migrate {
            migrations::run_migrations(&db.pool).await?;
        }
        Ok(db)
    }

    /// The underlying pool, for ad-hoc reads.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| match DbError::from(e) {
            busy @ (DbError::Busy(_) | DbError::PoolExhausted) => busy,
            other => DbError::TransactionFailed(other.to_string()),
        })
    }

    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone())
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository::new(self.pool.clone())
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn artifacts(&self) -> ArtifactRepository {
        ArtifactRepository::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        info!("Closing market database");
        self.pool.close().await;
    }

    /// True if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'ledger_entries'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn test_file_database_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");

        let db = Database::new(DbConfig::new(&path).busy_timeout(Duration::from_millis(250)))
            .await
            .unwrap();
        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
        db.close().await;

        // Second open finds the migrations already applied
        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert!(db.health_check().await);
    }

    #[test]
    fn test_memory_pool_is_single_connection() {
        let config = DbConfig::in_memory().max_connections(8);
        assert_eq!(config.pool_size(), 1);

        let config = DbConfig::new("/tmp/market.db").max_connections(0);
        assert_eq!(config.pool_size(), 1);
        assert!(!DbConfig::new("/tmp/market.db").migrate(false).migrate);
    }
}
