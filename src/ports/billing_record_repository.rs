//! Billing record repository port.
//!
//! Append-only ledger of paid invoices. `external_invoice_ref` is unique, and
//! a duplicate insert reports `SaveResult::AlreadyExists` instead of failing.

use async_trait::async_trait;

use super::SaveResult;
use crate::domain::billing::BillingRecord;
use crate::domain::foundation::{DomainError, UserId};

#[async_trait]
pub trait BillingRecordRepository: Send + Sync {
    async fn exists_for_invoice(&self, external_invoice_ref: &str) -> Result<bool, DomainError>;

    /// Insert unless a record for the same invoice exists.
    async fn insert(&self, record: &BillingRecord) -> Result<SaveResult, DomainError>;

    /// Most recent first, at most `limit` entries.
    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<BillingRecord>, DomainError>;
}
