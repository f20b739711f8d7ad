//! Post-commit side effects.
//!
//! Handlers return these instead of calling mailers or the audit log mid-transition.
//! The dispatcher runs them after the state change is committed, and a failing
//! effect is only logged.

use serde::Serialize;

use super::PlanId;
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};

/// Something to do once a transition has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEffect {
    Audit(AuditEntry),
    Email(EmailNotice),
    /// Withdraw refund requests made moot by a cancellation.
    CancelPendingRefunds { user_id: UserId },
}

/// Audit trail category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CheckoutStarted,
    SubscriptionStarted,
    SubscriptionReplaced,
    Upgraded,
    DowngradeScheduled,
    DowngradeReverted,
    DowngradeApplied,
    CancellationScheduled,
    Reactivated,
    PlanChangedAtProcessor,
    SubscriptionEnded,
    InvoicePaid,
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub user_id: UserId,
    pub action: AuditAction,
    pub subscription_id: Option<SubscriptionId>,
    pub from_plan: Option<PlanId>,
    pub to_plan: Option<PlanId>,
    pub occurred_at: Timestamp,
}

impl AuditEntry {
    pub fn new(user_id: UserId, action: AuditAction) -> Self {
        Self {
            user_id,
            action,
            subscription_id: None,
            from_plan: None,
            to_plan: None,
            occurred_at: Timestamp::now(),
        }
    }

    pub fn for_subscription(mut self, id: SubscriptionId) -> Self {
        self.subscription_id = Some(id);
        self
    }

    pub fn plans(mut self, from: Option<PlanId>, to: Option<PlanId>) -> Self {
        self.from_plan = from;
        self.to_plan = to;
        self
    }
}

/// Transactional email templates owned by the mail subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    SubscriptionStarted,
    UpgradeConfirmation,
    DowngradeScheduled,
    CancellationScheduled,
    ReactivationConfirmation,
}

/// A confirmation email to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailNotice {
    pub to: String,
    pub user_id: UserId,
    pub kind: EmailKind,
    pub plan: PlanId,
    /// When a scheduled change takes effect.
    pub effective_at: Option<Timestamp>,
}

impl BillingEffect {
    pub fn audit(entry: AuditEntry) -> Self {
        BillingEffect::Audit(entry)
    }

    pub fn email(
        to: impl Into<String>,
        user_id: UserId,
        kind: EmailKind,
        plan: PlanId,
        effective_at: Option<Timestamp>,
    ) -> Self {
        BillingEffect::Email(EmailNotice {
            to: to.into(),
            user_id,
            kind,
            plan,
            effective_at,
        })
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            BillingEffect::Audit(_) => "audit",
            BillingEffect::Email(_) => "email",
            BillingEffect::CancelPendingRefunds { .. } => "cancel_pending_refunds",
        }
    }
}
