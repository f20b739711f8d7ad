//! PostgreSQL adapters for collaborator ports.
//!
//! These read and write tables owned by the gallery and refund subsystems:
//! `galleries(id, owner_id, storage_bytes, custom_domain)` and
//! `refund_requests(user_id, status)`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::UsageSnapshot;
use crate::domain::foundation::{DomainError, GalleryId, UserId};
use crate::ports::{GalleryCleaner, RefundDesk, UsageEvaluator};

/// Usage, gallery deletion and refund lookups backed by the shared database.
#[derive(Clone)]
pub struct PostgresCollaborators {
    pool: PgPool,
}

impl PostgresCollaborators {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UsageRow {
    storage_bytes: i64,
    gallery_count: i64,
    custom_domain_in_use: bool,
}

#[async_trait]
impl UsageEvaluator for PostgresCollaborators {
    async fn usage_for(&self, user_id: &UserId) -> Result<UsageSnapshot, DomainError> {
        let row: UsageRow = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(storage_bytes), 0)::BIGINT AS storage_bytes,
                   COUNT(*)::BIGINT AS gallery_count,
                   COALESCE(BOOL_OR(custom_domain IS NOT NULL), FALSE) AS custom_domain_in_use
            FROM galleries
            WHERE owner_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to compute usage: {}", e)))?;

        Ok(UsageSnapshot {
            storage_bytes: u64::try_from(row.storage_bytes).unwrap_or(0),
            gallery_count: u32::try_from(row.gallery_count).unwrap_or(u32::MAX),
            custom_domain_in_use: row.custom_domain_in_use,
        })
    }
}

#[async_trait]
impl GalleryCleaner for PostgresCollaborators {
    async fn delete_galleries(
        &self,
        user_id: &UserId,
        gallery_ids: &[GalleryId],
    ) -> Result<u32, DomainError> {
        if gallery_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = gallery_ids.iter().map(|id| id.as_str().to_string()).collect();

        let result = sqlx::query("DELETE FROM galleries WHERE owner_id = $1 AND id = ANY($2)")
            .bind(user_id.as_str())
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to delete galleries: {}", e)))?;

        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl RefundDesk for PostgresCollaborators {
    async fn has_pending_refund(&self, user_id: &UserId) -> Result<bool, DomainError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM refund_requests WHERE user_id = $1 AND status = 'pending')",
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to check refunds: {}", e)))
    }

    async fn cancel_pending_refunds(&self, user_id: &UserId) -> Result<u32, DomainError> {
        let result = sqlx::query(
            "UPDATE refund_requests SET status = 'canceled' WHERE user_id = $1 AND status = 'pending'",
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to cancel refunds: {}", e)))?;

        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }
}
