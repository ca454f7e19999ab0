//! Input checks run at the engine's entry points, before a transaction
//! opens. The schema repeats the important ones as CHECK and UNIQUE
//! constraints, so a row that slips past here still cannot be stored.
//!
//! ```rust
//! use market_core::validation::{validate_quantity, validate_referral_token};
//!
//! assert!(validate_quantity(5).is_ok());
//! assert_eq!(validate_referral_token(" ab12cd ").unwrap(), "AB12CD");
//! ```

use crate::error::{CoreError, ValidationError};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

pub type ValidationResult<T> = Result<T, ValidationError>;

pub const REFERRAL_TOKEN_LEN: usize = 6;

pub const MEMBER_NUMBER_LEN: usize = 8;

const EXTERNAL_REF_MAX: usize = 150;

/// Largest page `query_ledger` and `list_orders` hand out.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// The identity-provider subject an account is registered under.
pub fn validate_external_ref(external_ref: &str) -> ValidationResult<()> {
    let external_ref = external_ref.trim();
    if external_ref.is_empty() {
        return Err(ValidationError::Required {
            field: "external_ref".to_string(),
        });
    }
    if external_ref.len() > EXTERNAL_REF_MAX {
        return Err(ValidationError::TooLong {
            field: "external_ref".to_string(),
            max: EXTERNAL_REF_MAX,
        });
    }
    Ok(())
}

/// Trims and upper-cases a referral token.
///
/// Anything that is not six ASCII letters or digits cannot be a token of
/// any account; the referral service reports it like an unknown token.
///
/// ```rust
/// use market_core::validation::validate_referral_token;
///
/// assert_eq!(validate_referral_token("x7k2pq").unwrap(), "X7K2PQ");
/// assert!(validate_referral_token("short").is_err());
/// ```
pub fn validate_referral_token(token: &str) -> ValidationResult<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ValidationError::Required {
            field: "referral_token".to_string(),
        });
    }

    let well_formed =
        token.len() == REFERRAL_TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric());
    if !well_formed {
        return Err(ValidationError::InvalidFormat {
            field: "referral_token".to_string(),
            reason: format!("expected {REFERRAL_TOKEN_LEN} letters or digits"),
        });
    }
    Ok(token.to_ascii_uppercase())
}

/// Quantity for one cart line: 1 through [`MAX_ITEM_QUANTITY`].
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if (1..=MAX_ITEM_QUANTITY).contains(&qty) {
        Ok(())
    } else {
        Err(ValidationError::out_of_range("quantity", 1, MAX_ITEM_QUANTITY))
    }
}

/// Credit and debit amounts are strictly positive.
pub fn validate_point_amount(amount: i64) -> Result<(), CoreError> {
    if amount <= 0 {
        return Err(CoreError::InvalidAmount { amount });
    }
    Ok(())
}

/// Points to redeem at checkout. Zero means no redemption.
pub fn validate_points_to_redeem(points: i64) -> Result<(), CoreError> {
    if points < 0 {
        return Err(CoreError::InvalidAmount { amount: points });
    }
    Ok(())
}

pub fn validate_limit(limit: i64) -> ValidationResult<()> {
    if (1..=MAX_PAGE_SIZE).contains(&limit) {
        Ok(())
    } else {
        Err(ValidationError::out_of_range("limit", 1, MAX_PAGE_SIZE))
    }
}

/// Room for one more distinct line, given how many the cart holds.
pub fn validate_cart_size(current_items: usize) -> ValidationResult<()> {
    if current_items < MAX_CART_ITEMS {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(
            "cart items",
            0,
            MAX_CART_ITEMS as i64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_ref_bounds() {
        assert!(validate_external_ref("somchai").is_ok());
        assert!(matches!(
            validate_external_ref("  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_external_ref(&"a".repeat(151)),
            Err(ValidationError::TooLong { max: 150, .. })
        ));
    }

    #[test]
    fn test_referral_token_shape() {
        assert_eq!(validate_referral_token("ab12cd").unwrap(), "AB12CD");
        assert!(validate_referral_token("").is_err());
        assert!(validate_referral_token("ABCDEFG").is_err());
        assert!(validate_referral_token("AB-12C").is_err());
    }

    #[test]
    fn test_quantity_range() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        for bad in [0, -1, MAX_ITEM_QUANTITY + 1] {
            assert!(validate_quantity(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_point_amounts() {
        assert!(validate_point_amount(1).is_ok());
        assert!(matches!(
            validate_point_amount(0),
            Err(CoreError::InvalidAmount { amount: 0 })
        ));
        assert!(matches!(
            validate_point_amount(-5),
            Err(CoreError::InvalidAmount { amount: -5 })
        ));

        assert!(validate_points_to_redeem(0).is_ok());
        assert!(validate_points_to_redeem(250).is_ok());
        assert!(validate_points_to_redeem(-1).is_err());
    }

    #[test]
    fn test_page_and_cart_limits() {
        assert!(validate_limit(10).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(MAX_PAGE_SIZE + 1).is_err());

        assert!(validate_cart_size(MAX_CART_ITEMS - 1).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS).is_err());
    }
}
