//! # Artifact Repository
//!
//! Stored payment references. One row per order; a second write for the
//! same order is a no-op, so regeneration can be retried safely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use market_core::PaymentReference;

/// A payment reference as persisted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredArtifact {
    pub order_id: String,
    pub reference: String,
    pub digest: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for order artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    pool: SqlitePool,
}

impl ArtifactRepository {
    /// Creates a new ArtifactRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ArtifactRepository { pool }
    }

    /// Gets the artifact of an order.
    pub async fn get_for_order(&self, order_id: &str) -> DbResult<Option<StoredArtifact>> {
        let artifact = sqlx::query_as::<_, StoredArtifact>(
            r#"
            SELECT order_id, reference, digest, payload, created_at
            FROM order_artifacts
            WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(artifact)
    }

    /// Stores an artifact unless the order already has one.
    ///
    /// Returns `true` if this call wrote the row.
    pub async fn insert_if_absent(
        conn: &mut SqliteConnection,
        order_id: &str,
        artifact: &PaymentReference,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_artifacts (order_id, reference, digest, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(&artifact.reference)
        .bind(&artifact.digest)
        .bind(&artifact.payload)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let written = result.rows_affected() == 1;
        debug!(order_id = %order_id, reference = %artifact.reference, written, "Stored artifact");
        Ok(written)
    }
}
