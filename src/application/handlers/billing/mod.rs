//! Billing handlers.
//!
//! Command and query handlers for the subscription lifecycle:
//!
//! ## Commands
//! - Starting a hosted checkout for a paid plan
//! - Changing plan (upgrade, scheduled downgrade, reactivation, reverting a downgrade)
//! - Downgrading after deleting galleries that exceed the target plan
//! - Cancelling at period end
//! - Reconciling processor webhooks
//!
//! ## Queries
//! - Current subscription and effective plan
//! - Downgrade feasibility against plan limits
//! - Billing history
//!
//! User-initiated changes to one subscription are serialized by `ChangeLock`.
//! Side effects (audit, email, refunds) run after the change is committed and
//! never fail the command.

mod cancel_subscription;
mod change_plan;
mod check_downgrade;
mod context;
mod create_checkout;
mod downgrade_with_cleanup;
mod effect_dispatcher;
mod get_subscription;
mod handle_billing_webhook;
mod list_billing_history;
mod lock_manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::BillingContext;
pub use effect_dispatcher::EffectDispatcher;
pub use lock_manager::ChangeLock;

// Commands
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use change_plan::{ChangePlanCommand, ChangePlanHandler, ChangePlanResult};
pub use create_checkout::{
    CheckoutUrls, CreateCheckoutCommand, CreateCheckoutHandler, CreateCheckoutResult,
};
pub use downgrade_with_cleanup::{
    DowngradeWithCleanupCommand, DowngradeWithCleanupHandler, DowngradeWithCleanupResult,
};
pub use handle_billing_webhook::{
    HandleBillingWebhookCommand, HandleBillingWebhookHandler, HandleBillingWebhookResult,
    ReconcilerSettings, WebhookDisposition,
};

// Queries
pub use check_downgrade::{CheckDowngradeHandler, CheckDowngradeQuery, CheckDowngradeResult};
pub use get_subscription::{GetSubscriptionHandler, GetSubscriptionQuery, GetSubscriptionResult};
pub use list_billing_history::{
    ListBillingHistoryHandler, ListBillingHistoryQuery, ListBillingHistoryResult,
};
