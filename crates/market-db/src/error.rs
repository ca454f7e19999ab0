//! # Storage Errors
//!
//! Every repository returns [`DbResult`]. Raw `sqlx::Error` values are
//! classified once, here, so the engine can decide between "retry the unit",
//! "report a domain error" and "give up".
//!
//! ```text
//!   sqlx::Error ──classify──► DbError ──► EngineError (market-engine)
//!                                │
//!                                └─ Busy / PoolExhausted: the engine rolls
//!                                   back and replays the whole unit
//! ```

use thiserror::Error;

/// Extended result codes SQLite reports while another connection holds
/// the lock: BUSY, LOCKED, BUSY_RECOVERY, LOCKED_SHAREDCACHE, BUSY_SNAPSHOT.
const LOCK_CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517"];

#[derive(Debug, Error)]
pub enum DbError {
    /// A lookup by key found nothing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// `field` is the `table.column` SQLite names in its message.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A CHECK rejected the row, e.g. a points balance going below zero.
    #[error("Check constraint failed: {message}")]
    CheckViolation { message: String },

    /// The write lock stayed taken past the busy timeout.
    ///
    /// Whatever the transaction wrote is rolled back; the unit has to be
    /// replayed from `BEGIN`.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// `BEGIN` or `COMMIT` failed for a reason other than contention.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// No connection became free within the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Contention that a fresh attempt of the same unit may get past.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    /// True for a unique violation whose `table.column` contains `column`.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        match self {
            DbError::UniqueViolation { field, .. } => field.contains(column),
            _ => false,
        }
    }

    /// Sorts a driver-level failure by SQLite's code and message.
    fn classify(code: Option<&str>, message: &str) -> Self {
        let locked = code.is_some_and(|c| LOCK_CONTENTION_CODES.contains(&c))
            || message.contains("database is locked");
        if locked {
            return DbError::Busy(message.to_string());
        }

        // SQLite: "UNIQUE constraint failed: accounts.referral_code"
        if let Some(field) = message.strip_prefix("UNIQUE constraint failed: ") {
            return DbError::duplicate(field, "unknown");
        }
        if message.contains("FOREIGN KEY constraint failed") {
            return DbError::ForeignKeyViolation {
                message: message.to_string(),
            };
        }
        if message.contains("CHECK constraint failed") {
            return DbError::CheckViolation {
                message: message.to_string(),
            };
        }
        DbError::QueryFailed(message.to_string())
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => {
                DbError::classify(db_err.code().as_deref(), db_err.message())
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}
