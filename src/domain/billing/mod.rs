//! Billing domain - plans, subscription records and the rules that move them.
//!
//! # Module Organization
//!
//! - `plan` / `catalog` / `limits` - what can be bought and what it allows
//! - `subscription` - the record mirroring one external subscription
//! - `transition` - pure validation of user-requested plan changes
//! - `effects` - side effects executed after a change is committed
//! - `stripe_event` / `webhook_verifier` - inbound processor notifications

mod billing_record;
mod catalog;
mod effects;
mod errors;
mod limits;
mod plan;
mod stripe_event;
mod subscription;
mod transition;
mod webhook_errors;
mod webhook_verifier;

pub use billing_record::BillingRecord;
pub use catalog::{Plan, PlanCatalog};
pub use effects::{AuditAction, AuditEntry, BillingEffect, EmailKind, EmailNotice};
pub use errors::{BillingError, GatewayFailure};
pub use limits::{LimitKind, LimitViolation, PlanLimits, UsageSnapshot};
pub use plan::{BillingInterval, PlanId};
pub use stripe_event::{
    CheckoutSessionObject, CustomerDetails, InvoiceLine, InvoiceLines, InvoiceObject, ItemList,
    PriceObject, StripeEvent, StripeEventData, StripeEventType, SubscriptionItem,
    SubscriptionObject,
};
pub use subscription::{LifecycleState, NewSubscription, SubscriptionRecord, SubscriptionStatus};
pub use transition::{
    classify_change, validate_transition, PlanAction, PlanTarget, RejectionCode, SubscriptionState,
    TransitionRejection,
};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{signature_header, SignatureHeader, StripeWebhookVerifier};

#[cfg(test)]
pub(crate) use subscription::test_support;
