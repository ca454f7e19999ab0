//! Order queries and status administration.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::EngineResult;
use market_core::validation::validate_limit;
use market_core::{CoreError, Order, OrderLine, OrderStatus};
use market_db::Database;

/// An order with its frozen lines.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone)]
pub struct OrderService {
    db: Database,
}

impl OrderService {
    pub fn new(db: Database) -> Self {
        OrderService { db }
    }

    pub async fn get_order(&self, order_number: &str) -> EngineResult<OrderDetails> {
        let order = self.find(order_number).await?;
        let lines = self.db.orders().get_lines(&order.id).await?;
        Ok(OrderDetails { order, lines })
    }

    /// Most recent first.
    pub async fn list_orders(&self, account_id: &str, limit: i64) -> EngineResult<Vec<Order>> {
        validate_limit(limit)?;
        Ok(self.db.orders().list_for_account(account_id, limit).await?)
    }

    /// Moves an order along its lifecycle.
    ///
    /// Only forward moves and cancellation before shipment are allowed.
    /// Cancelling does not touch the points ledger.
    pub async fn update_order_status(
        &self,
        order_number: &str,
        next: OrderStatus,
    ) -> EngineResult<Order> {
        let order = self.find(order_number).await?;
        let current = order.status;

        if !current.can_transition_to(next) {
            return Err(invalid_transition(order_number, current, next));
        }

        // Conditional on the status we read; a concurrent change wins
        let updated = self
            .db
            .orders()
            .update_status(order_number, current, next, Utc::now())
            .await?;
        if !updated {
            let latest = self.find(order_number).await?;
            return Err(invalid_transition(order_number, latest.status, next));
        }

        info!(order_number = %order_number, from = %current, to = %next, "Order status changed");
        self.find(order_number).await
    }

    async fn find(&self, order_number: &str) -> EngineResult<Order> {
        self.db
            .orders()
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_number.to_string()).into())
    }
}

fn invalid_transition(
    order_number: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> crate::error::EngineError {
    CoreError::InvalidStatusTransition {
        order_number: order_number.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartStaging;
    use crate::checkout::CheckoutEngine;
    use crate::config::CheckoutSettings;
    use crate::error::{EngineError, ErrorCode};
    use crate::testing::{grant_points, seed_account, seed_variant, test_db};

    async fn placed_order(db: &Database, external_ref: &str) -> (String, Order) {
        let account = seed_account(db, external_ref).await;
        let variant = seed_variant(db, "Fresh Spinach", 2500, 5).await;
        grant_points(db, &account.id, 100).await;
        CartStaging::new(db.clone(), CheckoutSettings::default())
            .add_item(&account.id, &variant, 2)
            .await
            .unwrap();
        let receipt = CheckoutEngine::new(db.clone(), CheckoutSettings::default())
            .submit_checkout(&account.id, 100)
            .await
            .unwrap();
        (account.id, receipt.order)
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let db = test_db().await;
        let (account_id, order) = placed_order(&db, "buyer").await;
        let service = OrderService::new(db.clone());

        let details = service.get_order(&order.order_number).await.unwrap();
        assert_eq!(details.lines.len(), 1);
        assert_eq!(details.order.total_amount_cents, 4000);

        let orders = service.list_orders(&account_id, 10).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_number, order.order_number);

        let err = service.get_order("ORD-none").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_forward_lifecycle() {
        let db = test_db().await;
        let (_, order) = placed_order(&db, "buyer").await;
        let service = OrderService::new(db);

        for next in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            let updated = service
                .update_order_status(&order.order_number, next)
                .await
                .unwrap();
            assert_eq!(updated.status, next);
        }

        let err = service
            .update_order_status(&order.order_number, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InvalidStatusTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_keeps_ledger() {
        let db = test_db().await;
        let (account_id, order) = placed_order(&db, "buyer").await;
        let service = OrderService::new(db.clone());
        let entries_before = db.ledger().count(&account_id).await.unwrap();

        let cancelled = service
            .update_order_status(&order.order_number, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(db.ledger().count(&account_id).await.unwrap(), entries_before);

        let err = service
            .update_order_status(&order.order_number, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
    }
}
