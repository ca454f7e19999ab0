//! # Payment Reference
//!
//! The artifact attached to every order after commit: a payment payload the
//! customer transfers against, plus a short reference code derived from it.
//!
//! ```text
//! (order_number, total, currency_code, created_at)   all frozen on the order
//!          │
//!          ▼
//! payload = "Order: ORD20260101093000-A1B2C3\nAmount: 40.00 THB\nDate: 2026-01-01 09:30"
//!          │
//!          ▼ sha256
//! digest  = 64 hex chars
//!          │
//!          ▼
//! reference = "PAY-" + first 12 hex chars, upper-case
//! ```
//!
//! Generation reads nothing but the order, whose fields never change after
//! commit, so it can be repeated after a failure and always yields the same
//! reference. Editing store settings later does not move it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::types::Order;

const REFERENCE_PREFIX: &str = "PAY-";
const REFERENCE_HEX_LEN: usize = 12;

/// A generated payment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub order_number: String,
    pub payload: String,
    /// Lower-case hex sha256 of `payload`.
    pub digest: String,
    /// Short code stored on the order.
    pub reference: String,
}

impl PaymentReference {
    /// Builds the reference for an order.
    ///
    /// ## Errors
    /// `ArtifactGenerationFailed` when the order number or currency is
    /// blank, or the amount is negative.
    pub fn generate(order: &Order) -> CoreResult<Self> {
        let failed = |reason: String| CoreError::ArtifactGenerationFailed {
            order_number: order.order_number.clone(),
            reason,
        };
        if order.order_number.trim().is_empty() {
            return Err(failed("order number is blank".to_string()));
        }
        if order.currency_code.trim().is_empty() {
            return Err(failed("currency is blank".to_string()));
        }
        let total = order.total_amount();
        if total.is_negative() {
            return Err(failed(format!("negative amount {}", total)));
        }

        let payload = format!(
            "Order: {}\nAmount: {}\nDate: {}",
            order.order_number,
            total.with_currency(&order.currency_code),
            order.created_at.format("%Y-%m-%d %H:%M"),
        );
        let digest = hex::encode(Sha256::digest(payload.as_bytes()));
        let reference = format!(
            "{}{}",
            REFERENCE_PREFIX,
            digest[..REFERENCE_HEX_LEN].to_ascii_uppercase()
        );

        Ok(PaymentReference {
            order_number: order.order_number.clone(),
            payload,
            digest,
            reference,
        })
    }

    /// Checks that a stored reference matches what the order produces.
    pub fn verify(reference: &str, order: &Order) -> bool {
        Self::generate(order)
            .map(|generated| generated.reference == reference)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;
    use chrono::{TimeZone, Utc};

    fn order(number: &str, total_cents: i64) -> Order {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 30, 15).unwrap();
        Order {
            id: "order-1".to_string(),
            order_number: number.to_string(),
            account_id: "acc-1".to_string(),
            subtotal_cents: total_cents,
            total_amount_cents: total_cents,
            currency_code: "THB".to_string(),
            points_redeemed: 0,
            points_discount_cents: 0,
            points_earned: 0,
            status: OrderStatus::Pending,
            artifact_ref: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_payload_format() {
        let r = PaymentReference::generate(&order("ORD1", 4000)).unwrap();
        assert_eq!(r.payload, "Order: ORD1\nAmount: 40.00 THB\nDate: 2026-01-01 09:30");
        assert_eq!(r.digest.len(), 64);
        assert!(r.reference.starts_with("PAY-"));
        assert_eq!(r.reference.len(), 16);
    }

    #[test]
    fn test_deterministic() {
        let a = PaymentReference::generate(&order("ORD1", 4000)).unwrap();
        let b = PaymentReference::generate(&order("ORD1", 4000)).unwrap();
        assert_eq!(a, b);

        let c = PaymentReference::generate(&order("ORD2", 4000)).unwrap();
        assert_ne!(a.reference, c.reference);
    }

    #[test]
    fn test_mutable_fields_do_not_move_reference() {
        let placed = order("ORD1", 4000);
        let r = PaymentReference::generate(&placed).unwrap();

        let mut shipped = placed.clone();
        shipped.status = OrderStatus::Shipped;
        shipped.artifact_ref = Some(r.reference.clone());
        shipped.updated_at = Utc::now();
        assert!(PaymentReference::verify(&r.reference, &shipped));
    }

    #[test]
    fn test_verify() {
        let r = PaymentReference::generate(&order("ORD1", 0)).unwrap();
        assert!(PaymentReference::verify(&r.reference, &order("ORD1", 0)));
        assert!(!PaymentReference::verify(&r.reference, &order("ORD1", 1)));

        let mut in_usd = order("ORD1", 0);
        in_usd.currency_code = "USD".to_string();
        assert!(!PaymentReference::verify(&r.reference, &in_usd));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            PaymentReference::generate(&order(" ", 0)),
            Err(CoreError::ArtifactGenerationFailed { .. })
        ));
        assert!(PaymentReference::generate(&order("ORD1", -1)).is_err());

        let mut no_currency = order("ORD1", 100);
        no_currency.currency_code = String::new();
        assert!(PaymentReference::generate(&no_currency).is_err());
    }
}
