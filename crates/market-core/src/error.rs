//! Domain errors.
//!
//! [`ValidationError`] describes malformed input and is raised before any
//! transaction opens. [`CoreError`] describes a business rule saying no.
//! market-engine wraps both (and `DbError`) into the error its callers see.
//!
//! Two variants never abort an operation: `InvalidToken` and
//! `ArtifactGenerationFailed` are reported back as part of a successful
//! result. See [`CoreError::is_advisory`].

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Cart is empty")]
    EmptyCart,

    /// The account holds fewer points than a debit or redemption asks for.
    /// Nothing is written: no order, no ledger entry, the cart is kept.
    #[error("Insufficient points for account {account_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        account_id: String,
        balance: i64,
        requested: i64,
    },

    /// Ledger amounts are positive; the direction lives in the entry kind.
    #[error("Invalid point amount: {amount}")]
    InvalidAmount { amount: i64 },

    /// Unknown variant, or one whose product was withdrawn from sale.
    #[error("Product variant not found: {0}")]
    VariantNotFound(String),

    #[error("Variant {variant_id} is not in the cart of account {account_id}")]
    ItemNotFound {
        account_id: String,
        variant_id: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Every attempt of an atomic unit lost the write lock.
    #[error("Concurrent update conflict after {attempts} attempts")]
    ConcurrentUpdateConflict { attempts: u32 },

    /// The account already has a referrer; the bonus is paid once.
    #[error("Account {0} has already been referred")]
    AlreadyReferred(String),

    #[error("Invalid referral token: {0}")]
    InvalidToken(String),

    /// The order stands; only its payment artifact is missing.
    #[error("Artifact generation failed for order {order_number}: {reason}")]
    ArtifactGenerationFailed {
        order_number: String,
        reason: String,
    },

    /// Backwards moves, leaving delivered/cancelled, or cancelling a
    /// shipped order.
    #[error("Order {order_number} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_number: String,
        from: String,
        to: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// True when the engine recovers locally and reports the error inside
    /// an otherwise successful result.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidToken(_) | CoreError::ArtifactGenerationFailed { .. }
        )
    }
}

/// Malformed input, named by the offending field.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Unparseable decimal, wrong token shape and the like.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    pub(crate) fn out_of_range(field: &str, min: i64, max: i64) -> Self {
        ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = CoreError::InsufficientBalance {
            account_id: "acc-1".to_string(),
            balance: 100,
            requested: 600,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient points for account acc-1: balance 100, requested 600"
        );

        let err = CoreError::ConcurrentUpdateConflict { attempts: 3 };
        assert_eq!(err.to_string(), "Concurrent update conflict after 3 attempts");

        let err = ValidationError::out_of_range("quantity", 1, 999);
        assert_eq!(err.to_string(), "quantity must be between 1 and 999");
    }

    #[test]
    fn test_only_token_and_artifact_failures_are_advisory() {
        assert!(CoreError::InvalidToken("ZZZ".into()).is_advisory());
        assert!(CoreError::ArtifactGenerationFailed {
            order_number: "ORD1".into(),
            reason: "disk".into(),
        }
        .is_advisory());
        assert!(!CoreError::EmptyCart.is_advisory());
        assert!(!CoreError::AlreadyReferred("acc".into()).is_advisory());
    }

    #[test]
    fn test_validation_lifts_into_core_error() {
        let core: CoreError = ValidationError::Required {
            field: "external_ref".to_string(),
        }
        .into();
        assert!(matches!(core, CoreError::Validation(ValidationError::Required { .. })));
    }
}
