//! Ports for subsystems billing consults but does not own.

use async_trait::async_trait;

use crate::domain::billing::{AuditEntry, EmailNotice, UsageSnapshot};
use crate::domain::foundation::{DomainError, GalleryId, UserId};

/// Reports current resource usage for limit checks.
#[async_trait]
pub trait UsageEvaluator: Send + Sync {
    async fn usage_for(&self, user_id: &UserId) -> Result<UsageSnapshot, DomainError>;
}

/// Deletes galleries a user chose to give up before downgrading.
#[async_trait]
pub trait GalleryCleaner: Send + Sync {
    /// Deletes the listed galleries owned by `user_id`.
    ///
    /// Ids that do not exist or belong to someone else are skipped.
    /// Returns how many galleries were removed.
    async fn delete_galleries(
        &self,
        user_id: &UserId,
        gallery_ids: &[GalleryId],
    ) -> Result<u32, DomainError>;
}

/// Refund subsystem.
#[async_trait]
pub trait RefundDesk: Send + Sync {
    async fn has_pending_refund(&self, user_id: &UserId) -> Result<bool, DomainError>;

    /// Withdraws open refund requests. Returns how many were withdrawn.
    async fn cancel_pending_refunds(&self, user_id: &UserId) -> Result<u32, DomainError>;
}

/// Destination for billing audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), DomainError>;
}

/// Sends transactional billing emails.
#[async_trait]
pub trait BillingMailer: Send + Sync {
    async fn send(&self, notice: &EmailNotice) -> Result<(), DomainError>;
}
