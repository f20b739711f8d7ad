//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

pub mod billing;

pub use billing::{
    // Shared wiring
    BillingContext,
    ChangeLock,
    CheckoutUrls,
    EffectDispatcher,
    ReconcilerSettings,
    // Commands
    CancelSubscriptionCommand,
    CancelSubscriptionHandler,
    CancelSubscriptionResult,
    ChangePlanCommand,
    ChangePlanHandler,
    ChangePlanResult,
    CreateCheckoutCommand,
    CreateCheckoutHandler,
    CreateCheckoutResult,
    DowngradeWithCleanupCommand,
    DowngradeWithCleanupHandler,
    DowngradeWithCleanupResult,
    HandleBillingWebhookCommand,
    HandleBillingWebhookHandler,
    HandleBillingWebhookResult,
    WebhookDisposition,
    // Queries
    CheckDowngradeHandler,
    CheckDowngradeQuery,
    CheckDowngradeResult,
    GetSubscriptionHandler,
    GetSubscriptionQuery,
    GetSubscriptionResult,
    ListBillingHistoryHandler,
    ListBillingHistoryQuery,
    ListBillingHistoryResult,
};
