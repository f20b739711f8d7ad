//! ListBillingHistoryHandler - Query handler for paid invoices.

use std::sync::Arc;

use crate::domain::billing::{BillingError, BillingRecord};
use crate::domain::foundation::UserId;
use crate::ports::{BillingRecordRepository, UserDirectory};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct ListBillingHistoryQuery {
    pub user_id: UserId,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ListBillingHistoryResult {
    /// Newest first.
    pub records: Vec<BillingRecord>,
}

pub struct ListBillingHistoryHandler {
    users: Arc<dyn UserDirectory>,
    billing_records: Arc<dyn BillingRecordRepository>,
}

impl ListBillingHistoryHandler {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        billing_records: Arc<dyn BillingRecordRepository>,
    ) -> Self {
        Self {
            users,
            billing_records,
        }
    }

    pub async fn handle(
        &self,
        query: ListBillingHistoryQuery,
    ) -> Result<ListBillingHistoryResult, BillingError> {
        if self.users.find_by_id(&query.user_id).await?.is_none() {
            return Err(BillingError::UserNotFound(query.user_id));
        }

        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let records = self
            .billing_records
            .list_by_user(&query.user_id, limit)
            .await?;

        Ok(ListBillingHistoryResult { records })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::domain::billing::PlanId;

    #[tokio::test]
    async fn lists_newest_first_within_limit() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Plus);
        for i in 0..3 {
            h.billing_records
                .insert(&BillingRecord::paid_invoice(
                    user.clone(),
                    format!("in_{}", i),
                    1200,
                    "usd",
                    Some(PlanId::Plus),
                ))
                .await
                .unwrap();
        }

        let handler = ListBillingHistoryHandler::new(h.users.clone(), h.billing_records.clone());
        let result = handler
            .handle(ListBillingHistoryQuery {
                user_id: user,
                limit: Some(2),
            })
            .await
            .unwrap();

        let refs: Vec<_> = result
            .records
            .iter()
            .map(|r| r.external_invoice_ref.as_str())
            .collect();
        assert_eq!(refs, vec!["in_2", "in_1"]);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = Harness::new();
        let handler = ListBillingHistoryHandler::new(h.users.clone(), h.billing_records.clone());

        let err = handler
            .handle(ListBillingHistoryQuery {
                user_id: UserId::new("ghost").unwrap(),
                limit: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_NOT_FOUND");
    }
}
