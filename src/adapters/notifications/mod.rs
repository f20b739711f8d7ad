//! Log-backed audit and mail sinks.
//!
//! The mail subsystem owns templates and delivery; until it is wired in, the
//! service writes audit entries and email requests to the structured log where
//! the log pipeline picks them up.

use async_trait::async_trait;

use crate::domain::billing::{AuditEntry, EmailNotice};
use crate::domain::foundation::DomainError;
use crate::ports::{AuditLog, BillingMailer};

/// Writes audit entries as `billing_audit` log events.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), DomainError> {
        tracing::info!(
            target: "billing_audit",
            user_id = %entry.user_id,
            action = ?entry.action,
            subscription_id = ?entry.subscription_id,
            from_plan = ?entry.from_plan,
            to_plan = ?entry.to_plan,
            occurred_at = %entry.occurred_at.as_datetime(),
            "Billing audit entry"
        );
        Ok(())
    }
}

/// Emits email requests as `billing_mail` log events.
#[derive(Debug, Clone, Default)]
pub struct TracingMailer;

#[async_trait]
impl BillingMailer for TracingMailer {
    async fn send(&self, notice: &EmailNotice) -> Result<(), DomainError> {
        tracing::info!(
            target: "billing_mail",
            user_id = %notice.user_id,
            kind = ?notice.kind,
            plan = %notice.plan,
            effective_at = ?notice.effective_at,
            "Billing email requested"
        );
        Ok(())
    }
}
