//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    billing_history, cancel_subscription, change_plan, check_downgrade, create_checkout,
    downgrade_with_cleanup, get_subscription, handle_billing_webhook, BillingAppState,
};

/// Create the billing API router.
///
/// # Routes
///
/// ## User Endpoints (require `X-User-Id`)
/// - `POST /checkout` - Start a hosted checkout
/// - `GET /subscription` - Effective plan and latest subscription
/// - `POST /subscription/change-plan` - Upgrade, downgrade or reactivate
/// - `POST /subscription/cancel` - Cancel at period end
/// - `GET /subscription/check-downgrade` - Limit check for a downgrade
/// - `POST /subscription/downgrade` - Delete galleries, then downgrade
/// - `GET /history` - Paid invoices
///
/// ## Webhook Endpoints (no auth, signature verified)
/// - `POST /webhook` - Processor webhook deliveries
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/subscription", get(get_subscription))
        .route("/subscription/change-plan", post(change_plan))
        .route("/subscription/cancel", post(cancel_subscription))
        .route("/subscription/check-downgrade", get(check_downgrade))
        .route("/subscription/downgrade", post(downgrade_with_cleanup))
        .route("/history", get(billing_history))
        .route("/webhook", post(handle_billing_webhook))
}

/// Billing routes mounted under `/billing`.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new().nest("/billing", billing_routes())
}
