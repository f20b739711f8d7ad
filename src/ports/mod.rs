//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing domain and the outside world. Adapters implement these ports.
//!
//! ## Owned Storage
//!
//! - `SubscriptionRepository` - Subscription records and the change lock
//! - `BillingRecordRepository` - Paid invoice ledger
//! - `WebhookEventRepository` - Stripe webhook idempotency tracking
//! - `UserDirectory` - User lookup and the effective plan column
//!
//! ## Processor
//!
//! - `BillingGateway` - Checkout, subscription and customer operations
//!
//! ## Collaborators
//!
//! - `UsageEvaluator`, `GalleryCleaner`, `RefundDesk`, `AuditLog`, `BillingMailer`

mod billing_gateway;
mod billing_record_repository;
mod collaborators;
mod subscription_repository;
mod user_directory;
mod webhook_event_repository;

pub use billing_gateway::{
    BillingGateway, CheckoutRequest, CheckoutSession, ExternalCustomer, ExternalSubscription,
    GatewayError, GatewayErrorKind, ProrationMode, SubscriptionModification,
};
pub use billing_record_repository::BillingRecordRepository;
pub use collaborators::{AuditLog, BillingMailer, GalleryCleaner, RefundDesk, UsageEvaluator};
pub use subscription_repository::SubscriptionRepository;
pub use user_directory::{UserAccount, UserDirectory};
pub use webhook_event_repository::{
    ProcessedWebhookEvent, SaveResult, WebhookEventRepository, WebhookOutcome,
};
