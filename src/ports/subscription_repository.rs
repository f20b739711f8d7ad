//! Subscription repository port.
//!
//! Persists `SubscriptionRecord`s and owns the `processing_change` column.
//!
//! # Design
//!
//! - **Never deleted**: records are updated in place and end as `canceled`
//! - **Lock column isolation**: `update` must not write `processing_change`;
//!   only the two lock methods do, so a slow writer cannot clobber the flag
//! - **Most recent first**: user lookups return the newest record

use async_trait::async_trait;

use crate::domain::billing::SubscriptionRecord;
use crate::domain::foundation::{DomainError, SubscriptionId, UserId};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the external subscription reference is already stored
    /// - `DatabaseError` on persistence failure
    async fn insert(&self, record: &SubscriptionRecord) -> Result<(), DomainError>;

    /// Write every column except `processing_change`.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the record does not exist
    async fn update(&self, record: &SubscriptionRecord) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &SubscriptionId)
        -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Newest record for the user regardless of status.
    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    async fn find_by_external_ref(
        &self,
        external_subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Newest record billed to the external customer.
    async fn find_latest_by_customer(
        &self,
        external_customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Conditionally sets `processing_change` from false to true.
    ///
    /// Returns `false` when another change already holds the flag.
    async fn try_acquire_change_lock(&self, id: &SubscriptionId) -> Result<bool, DomainError>;

    /// Unconditionally clears `processing_change`.
    async fn release_change_lock(&self, id: &SubscriptionId) -> Result<(), DomainError>;
}
