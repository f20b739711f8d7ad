//! Append-only record of a paid invoice.

use serde::{Deserialize, Serialize};

use super::PlanId;
use crate::domain::foundation::{BillingRecordId, Timestamp, UserId};

/// One paid invoice, deduplicated by `external_invoice_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: BillingRecordId,
    pub user_id: UserId,
    pub external_invoice_ref: String,
    /// Amount paid in the smallest currency unit.
    pub amount: i64,
    /// ISO currency code, lowercase as the processor reports it.
    pub currency: String,
    pub status: String,
    pub plan: Option<PlanId>,
    pub created_at: Timestamp,
}

impl BillingRecord {
    /// Creates the record for a paid invoice.
    pub fn paid_invoice(
        user_id: UserId,
        external_invoice_ref: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        plan: Option<PlanId>,
    ) -> Self {
        Self {
            id: BillingRecordId::new(),
            user_id,
            external_invoice_ref: external_invoice_ref.into(),
            amount,
            currency: currency.into().to_ascii_lowercase(),
            status: "paid".to_string(),
            plan,
            created_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_invoice_normalizes_currency_and_status() {
        let record = BillingRecord::paid_invoice(
            UserId::new("u1").unwrap(),
            "in_123",
            1_200,
            "USD",
            Some(PlanId::Plus),
        );

        assert_eq!(record.currency, "usd");
        assert_eq!(record.status, "paid");
        assert_eq!(record.external_invoice_ref, "in_123");
    }
}
