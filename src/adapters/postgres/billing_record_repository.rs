//! PostgreSQL implementation of BillingRecordRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{BillingRecord, PlanId};
use crate::domain::foundation::{BillingRecordId, DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::{BillingRecordRepository, SaveResult};

pub struct PostgresBillingRecordRepository {
    pool: PgPool,
}

impl PostgresBillingRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BillingRecordRow {
    id: Uuid,
    user_id: String,
    external_invoice_ref: String,
    amount: i64,
    currency: String,
    status: String,
    plan: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BillingRecordRow> for BillingRecord {
    type Error = DomainError;

    fn try_from(row: BillingRecordRow) -> Result<Self, Self::Error> {
        let invalid =
            |e: String| DomainError::new(ErrorCode::DatabaseError, format!("Invalid billing record: {}", e));
        Ok(BillingRecord {
            id: BillingRecordId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| invalid(e.to_string()))?,
            external_invoice_ref: row.external_invoice_ref,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            plan: row
                .plan
                .as_deref()
                .map(PlanId::normalize)
                .transpose()
                .map_err(|e| invalid(e.to_string()))?,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl BillingRecordRepository for PostgresBillingRecordRepository {
    async fn exists_for_invoice(&self, external_invoice_ref: &str) -> Result<bool, DomainError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM billing_records WHERE external_invoice_ref = $1)",
        )
        .bind(external_invoice_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to check billing record: {}", e)))?;

        Ok(exists)
    }

    async fn insert(&self, record: &BillingRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_records (
                id, user_id, external_invoice_ref, amount, currency, status, plan, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (external_invoice_ref) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_str())
        .bind(&record.external_invoice_ref)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.status)
        .bind(record.plan.map(|p| p.as_str()))
        .bind(record.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to insert billing record: {}", e)))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<BillingRecord>, DomainError> {
        let rows: Vec<BillingRecordRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, external_invoice_ref, amount, currency, status, plan, created_at
            FROM billing_records
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list billing records: {}", e)))?;

        rows.into_iter().map(BillingRecord::try_from).collect()
    }
}
