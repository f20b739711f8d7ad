//! HTTP adapter for billing endpoints.
//!
//! Exposes the billing handlers via REST API:
//! - `POST /billing/checkout` - Start a hosted checkout
//! - `GET /billing/subscription` - Current subscription
//! - `POST /billing/subscription/change-plan` - Change plan
//! - `POST /billing/subscription/cancel` - Cancel at period end
//! - `GET /billing/subscription/check-downgrade` - Downgrade limit check
//! - `POST /billing/subscription/downgrade` - Downgrade after gallery cleanup
//! - `GET /billing/history` - Paid invoices
//! - `POST /billing/webhook` - Processor webhooks

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{AuthenticatedUser, BillingApiError, BillingAppState, WebhookApiError};
pub use routes::{billing_router, billing_routes};
