//! PostgreSQL implementation of UserDirectory over the shared `users` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::PlanId;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::{UserAccount, UserDirectory};

pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    plan: String,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let invalid =
            |e: String| DomainError::new(ErrorCode::DatabaseError, format!("Invalid user row: {}", e));
        Ok(UserAccount {
            id: UserId::new(row.id).map_err(|e| invalid(e.to_string()))?,
            email: row.email,
            plan: PlanId::normalize(&row.plan).map_err(|e| invalid(e.to_string()))?,
        })
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, email, plan FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to find user: {}", e)))?;

        row.map(UserAccount::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, plan FROM users WHERE lower(email) = lower($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find user by email: {}", e)))?;

        row.map(UserAccount::try_from).transpose()
    }

    async fn set_plan(&self, id: &UserId, plan: PlanId) -> Result<(), DomainError> {
        let result = sqlx::query("UPDATE users SET plan = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(plan.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to set user plan: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(ErrorCode::UserNotFound, "User not found")
                .with_detail("user_id", id.as_str()));
        }
        Ok(())
    }
}
