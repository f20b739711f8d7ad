//! User directory port.
//!
//! Users belong to the account subsystem. Billing reads them by id or email and
//! is the only writer of their `plan` column.

use async_trait::async_trait;

use crate::domain::billing::PlanId;
use crate::domain::foundation::{DomainError, UserId};

/// The slice of a user account billing cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    /// Effective plan, already normalized.
    pub plan: PlanId,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserAccount>, DomainError>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, DomainError>;

    /// Writes the effective plan.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if no such user exists
    async fn set_plan(&self, id: &UserId, plan: PlanId) -> Result<(), DomainError>;
}
