//! # Engine Error Type
//!
//! Unified error type for every operation the engine exposes.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in the Points Engine                      │
//! │                                                                         │
//! │  submit_checkout(account, points)                                      │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  EngineResult<T>                                                 │  │
//! │  │         │                                                        │  │
//! │  │  Business rule? ─── CoreError::InsufficientBalance ──┐          │  │
//! │  │         │                                            │          │  │
//! │  │  Database?      ─── DbError::Busy ── retried ────────┤          │  │
//! │  │         │                                            ▼          │  │
//! │  │  Config?        ─── EngineError::Config ──────► EngineError     │  │
//! │  │                                                      │          │  │
//! │  └──────────────────────────────────────────────────────┼──────────┘  │
//! │                                                         ▼             │
//! │                                        err.code() == INSUFFICIENT_BALANCE
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use market_core::{CoreError, ValidationError};
use market_db::DbError;

/// Error returned from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule violation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Persistence failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable error codes.
///
/// ## Serialization
/// ```json
/// { "code": "INSUFFICIENT_BALANCE", "message": "Insufficient points for account ..." }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EmptyCart,
    InsufficientBalance,
    InvalidAmount,
    /// Account, order, or variant does not exist
    NotFound,
    ItemNotFound,
    ConcurrentUpdateConflict,
    AlreadyReferred,
    InvalidToken,
    ArtifactGenerationFailed,
    InvalidStatusTransition,
    ValidationError,
    /// Unique constraint hit (duplicate registration)
    Conflict,
    DatabaseError,
    ConfigError,
}

/// Serializable form of an [`EngineError`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    /// Stable code for programmatic handling.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(err) => match err {
                CoreError::EmptyCart => ErrorCode::EmptyCart,
                CoreError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                CoreError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                CoreError::VariantNotFound(_)
                | CoreError::AccountNotFound(_)
                | CoreError::OrderNotFound(_) => ErrorCode::NotFound,
                CoreError::ItemNotFound { .. } => ErrorCode::ItemNotFound,
                CoreError::ConcurrentUpdateConflict { .. } => ErrorCode::ConcurrentUpdateConflict,
                CoreError::AlreadyReferred(_) => ErrorCode::AlreadyReferred,
                CoreError::InvalidToken(_) => ErrorCode::InvalidToken,
                CoreError::ArtifactGenerationFailed { .. } => ErrorCode::ArtifactGenerationFailed,
                CoreError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            EngineError::Database(err) => match err {
                DbError::NotFound { .. } => ErrorCode::NotFound,
                DbError::UniqueViolation { .. } => ErrorCode::Conflict,
                DbError::CheckViolation { .. } | DbError::ForeignKeyViolation { .. } => {
                    ErrorCode::ValidationError
                }
                _ => ErrorCode::DatabaseError,
            },
            EngineError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Whether the failed unit may succeed if run again from the start.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Database(err) if err.is_busy())
    }

    /// The underlying domain error, if any.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(err) => Some(err),
            _ => None,
        }
    }

    /// Code and message, ready to serialize for a caller.
    pub fn to_body(&self) -> ErrorBody {
        if let EngineError::Database(err) = self {
            if self.code() == ErrorCode::DatabaseError {
                // Keep SQL details in the logs only
                tracing::error!(error = %err, "Database operation failed");
                return ErrorBody {
                    code: ErrorCode::DatabaseError,
                    message: "Database operation failed".to_string(),
                };
            }
        }
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(DbError::from(err))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: EngineError = CoreError::EmptyCart.into();
        assert_eq!(err.code(), ErrorCode::EmptyCart);

        let err: EngineError = CoreError::AccountNotFound("a".into()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: EngineError = DbError::duplicate("accounts.external_ref", "bob").into();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn test_only_busy_is_retryable() {
        let busy: EngineError = DbError::Busy("database is locked".into()).into();
        assert!(busy.is_retryable());

        let conflict: EngineError = CoreError::ConcurrentUpdateConflict { attempts: 3 }.into();
        assert!(!conflict.is_retryable());
        assert!(!EngineError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_body_serialization() {
        let err: EngineError = CoreError::InsufficientBalance {
            account_id: "acc".into(),
            balance: 100,
            requested: 600,
        }
        .into();
        let json = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(json["code"], "INSUFFICIENT_BALANCE");

        let err: EngineError = DbError::QueryFailed("near \"SELEC\": syntax error".into()).into();
        let body = err.to_body();
        assert_eq!(body.message, "Database operation failed");
    }
}
