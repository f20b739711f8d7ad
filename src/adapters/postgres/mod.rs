//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresSubscriptionRepository` - Subscription records and the change lock
//! - `PostgresBillingRecordRepository` - Paid invoice ledger
//! - `PostgresWebhookEventRepository` - Processed webhook events
//! - `PostgresUserDirectory` - Users and their effective plan
//! - `PostgresCollaborators` - Usage, gallery cleanup and refunds

mod billing_record_repository;
mod collaborators;
mod subscription_repository;
mod user_directory;
mod webhook_event_repository;

pub use billing_record_repository::PostgresBillingRecordRepository;
pub use collaborators::PostgresCollaborators;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use user_directory::PostgresUserDirectory;
pub use webhook_event_repository::PostgresWebhookEventRepository;
