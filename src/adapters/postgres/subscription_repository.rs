//! PostgreSQL implementation of SubscriptionRepository.
//!
//! `processing_change` is written only by the lock queries; `update` leaves
//! the column alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{BillingInterval, PlanId, SubscriptionRecord, SubscriptionStatus};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::ports::SubscriptionRepository;

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, external_subscription_ref, external_customer_ref, user_email,
           plan, status, billing_interval, cancel_at_period_end, pending_plan,
           pending_plan_change_at, processing_change, created_at, updated_at, canceled_at
    FROM subscriptions
"#;

/// PostgreSQL implementation of the SubscriptionRepository port.
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let sql = format!("{} WHERE {} ORDER BY created_at DESC LIMIT 1", SELECT_COLUMNS, clause);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subscription", e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }
}

/// Database row representation of a subscription record.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    external_subscription_ref: String,
    external_customer_ref: String,
    user_email: String,
    plan: String,
    status: String,
    billing_interval: String,
    cancel_at_period_end: bool,
    pending_plan: Option<String>,
    pending_plan_change_at: Option<DateTime<Utc>>,
    processing_change: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionRecord {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            external_subscription_ref: row.external_subscription_ref,
            external_customer_ref: row.external_customer_ref,
            user_email: row.user_email,
            // Stored values may predate plan renames.
            plan: PlanId::normalize(&row.plan).map_err(corrupt)?,
            status: row.status.parse::<SubscriptionStatus>().map_err(corrupt)?,
            interval: row.billing_interval.parse::<BillingInterval>().map_err(corrupt)?,
            cancel_at_period_end: row.cancel_at_period_end,
            pending_plan: row
                .pending_plan
                .as_deref()
                .map(PlanId::normalize)
                .transpose()
                .map_err(corrupt)?,
            pending_plan_change_at: row.pending_plan_change_at.map(Timestamp::from_datetime),
            processing_change: row.processing_change,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
        })
    }
}

fn corrupt(err: impl std::fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid subscription row: {}", err),
    )
}

fn db_error(operation: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Failed to {}: {}", operation, err),
    )
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, external_subscription_ref, external_customer_ref, user_email,
                plan, status, billing_interval, cancel_at_period_end, pending_plan,
                pending_plan_change_at, processing_change, created_at, updated_at, canceled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE, $12, $13, $14)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_str())
        .bind(&record.external_subscription_ref)
        .bind(&record.external_customer_ref)
        .bind(&record.user_email)
        .bind(record.plan.as_str())
        .bind(record.status.as_str())
        .bind(record.interval.as_str())
        .bind(record.cancel_at_period_end)
        .bind(record.pending_plan.map(|p| p.as_str()))
        .bind(record.pending_plan_change_at.map(|t| *t.as_datetime()))
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .bind(record.canceled_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("subscriptions_external_subscription_ref_key") {
                    return DomainError::new(
                        ErrorCode::Conflict,
                        "External subscription is already recorded",
                    );
                }
            }
            db_error("insert subscription", e)
        })?;

        Ok(())
    }

    async fn update(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                external_customer_ref = $2,
                user_email = $3,
                plan = $4,
                status = $5,
                billing_interval = $6,
                cancel_at_period_end = $7,
                pending_plan = $8,
                pending_plan_change_at = $9,
                updated_at = $10,
                canceled_at = $11
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.external_customer_ref)
        .bind(&record.user_email)
        .bind(record.plan.as_str())
        .bind(record.status.as_str())
        .bind(record.interval.as_str())
        .bind(record.cancel_at_period_end)
        .bind(record.pending_plan.map(|p| p.as_str()))
        .bind(record.pending_plan_change_at.map(|t| *t.as_datetime()))
        .bind(record.updated_at.as_datetime())
        .bind(record.canceled_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                "Subscription not found",
            ));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let sql = format!("{} WHERE id = $1", SELECT_COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subscription", e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        self.fetch_one_where("user_id = $1", user_id.as_str()).await
    }

    async fn find_by_external_ref(
        &self,
        external_subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        self.fetch_one_where("external_subscription_ref = $1", external_subscription_ref)
            .await
    }

    async fn find_latest_by_customer(
        &self,
        external_customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        self.fetch_one_where("external_customer_ref = $1", external_customer_ref)
            .await
    }

    async fn try_acquire_change_lock(&self, id: &SubscriptionId) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET processing_change = TRUE
            WHERE id = $1 AND processing_change = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("acquire change lock", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_change_lock(&self, id: &SubscriptionId) -> Result<(), DomainError> {
        sqlx::query("UPDATE subscriptions SET processing_change = FALSE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("release change lock", e))?;
        Ok(())
    }
}
