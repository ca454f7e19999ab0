//! # Order Artifact Generator
//!
//! Derives the payment reference of a committed order and stores it.
//!
//! Runs strictly after the checkout transaction commits. A failure here
//! never touches the order: it is logged, reported as
//! [`ArtifactOutcome::Failed`], and the order is picked up again by
//! [`OrderArtifactGenerator::regenerate_missing`] or on demand by
//! [`OrderArtifactGenerator::payment_summary`].
//!
//! ```text
//! ┌──────────────┐  commit  ┌──────────────────────┐  ok   ┌────────────────────┐
//! │ checkout tx  │ ───────► │ generate_for(order)  │ ────► │ order_artifacts +  │
//! └──────────────┘          └──────────┬───────────┘       │ orders.artifact_ref│
//!                                      │ err               └────────────────────┘
//!                                      ▼
//!                           warn! + Failed { reason }   (order stays valid)
//! ```

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use market_core::validation::validate_limit;
use market_core::{CoreError, Money, Order, PaymentReference};
use market_db::{ArtifactRepository, Database, DbError, OrderRepository, StoredArtifact};

/// What happened when an artifact was requested.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Generated(PaymentReference),
    /// The order is committed; the artifact can be generated later.
    Failed { reason: String },
}

impl ArtifactOutcome {
    pub fn reference(&self) -> Option<&str> {
        match self {
            ArtifactOutcome::Generated(r) => Some(&r.reference),
            ArtifactOutcome::Failed { .. } => None,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, ArtifactOutcome::Generated(_))
    }
}

/// Summary of a regeneration sweep.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationReport {
    pub attempted: usize,
    pub generated: usize,
    /// Order numbers that still have no artifact.
    pub failed: Vec<String>,
}

/// Everything a customer needs to pay for an order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub order: Order,
    pub amount_due: Money,
    /// The order's own currency; later settings edits do not change it.
    pub currency_code: String,
    pub artifact: Option<StoredArtifact>,
    /// Why `artifact` is missing, when it is.
    pub artifact_error: Option<String>,
    pub company_name: String,
    pub bank_name: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
}

/// Generates and stores payment references.
#[derive(Debug, Clone)]
pub struct OrderArtifactGenerator {
    db: Database,
}

impl OrderArtifactGenerator {
    pub fn new(db: Database) -> Self {
        OrderArtifactGenerator { db }
    }

    /// Generates and attaches the artifact of a committed order.
    ///
    /// Never fails: errors become [`ArtifactOutcome::Failed`].
    pub async fn generate_for(&self, order: &Order) -> ArtifactOutcome {
        match self.try_generate(order).await {
            Ok(reference) => {
                info!(
                    order_number = %order.order_number,
                    reference = %reference.reference,
                    "Payment reference attached"
                );
                ArtifactOutcome::Generated(reference)
            }
            Err(err) => {
                warn!(
                    order_number = %order.order_number,
                    error = %err,
                    "Artifact generation failed; order kept without artifact"
                );
                ArtifactOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn try_generate(&self, order: &Order) -> EngineResult<PaymentReference> {
        let reference = PaymentReference::generate(order)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let stored = ArtifactRepository::insert_if_absent(&mut tx, &order.id, &reference, now).await?;
        OrderRepository::attach_artifact_ref(&mut tx, &order.id, &reference.reference).await?;
        tx.commit().await.map_err(DbError::from)?;

        if !stored {
            debug!(order_number = %order.order_number, "Artifact already stored");
        }
        Ok(reference)
    }

    /// Generates artifacts for committed orders that lack one, oldest first.
    pub async fn regenerate_missing(&self, limit: i64) -> EngineResult<RegenerationReport> {
        validate_limit(limit)?;
        let orders = self.db.orders().without_artifact(limit).await?;

        let mut report = RegenerationReport {
            attempted: orders.len(),
            ..Default::default()
        };
        for order in &orders {
            match self.generate_for(order).await {
                ArtifactOutcome::Generated(_) => report.generated += 1,
                ArtifactOutcome::Failed { .. } => report.failed.push(order.order_number.clone()),
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                generated = report.generated,
                "Artifact regeneration finished"
            );
        }
        Ok(report)
    }

    /// Whether `reference` is the one the order's fields produce.
    pub async fn verify_artifact(&self, order_number: &str, reference: &str) -> EngineResult<bool> {
        let order = self.order(order_number).await?;
        Ok(PaymentReference::verify(reference, &order))
    }

    /// Order, bank details and payment reference, generating the
    /// reference first if it is missing.
    pub async fn payment_summary(&self, order_number: &str) -> EngineResult<PaymentSummary> {
        let mut order = self.order(order_number).await?;
        let mut artifact = self.db.artifacts().get_for_order(&order.id).await?;
        let mut artifact_error = None;

        if artifact.is_none() {
            match self.generate_for(&order).await {
                ArtifactOutcome::Generated(reference) => {
                    order.artifact_ref = Some(reference.reference);
                    artifact = self.db.artifacts().get_for_order(&order.id).await?;
                }
                ArtifactOutcome::Failed { reason } => artifact_error = Some(reason),
            }
        }

        let settings = self.db.settings().current().await?;
        Ok(PaymentSummary {
            amount_due: order.total_amount(),
            currency_code: order.currency_code.clone(),
            order,
            artifact,
            artifact_error,
            company_name: settings.company_name,
            bank_name: settings.bank_name,
            bank_account_name: settings.bank_account_name,
            bank_account_number: settings.bank_account_number,
        })
    }

    async fn order(&self, order_number: &str) -> EngineResult<Order> {
        self.db
            .orders()
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_number.to_string()).into())
    }
}
