//! CreateCheckoutHandler - Command handler for starting a paid subscription.
//!
//! Only opens a hosted checkout session. The subscription record is created
//! when the processor reports the completed checkout.

use crate::domain::billing::{
    validate_transition, AuditAction, AuditEntry, BillingEffect, BillingError, BillingInterval,
    PlanAction, PlanId,
};
use crate::domain::foundation::UserId;
use crate::ports::CheckoutRequest;

use super::BillingContext;

/// Command to start checkout for a plan.
#[derive(Debug, Clone)]
pub struct CreateCheckoutCommand {
    pub user_id: UserId,
    pub plan: String,
    pub interval: String,
}

/// Result of a created checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutResult {
    pub session_id: String,
    pub checkout_url: String,
    pub plan: PlanId,
    pub interval: BillingInterval,
}

/// Redirect targets for the hosted checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    /// Standard return pages under the web app's base URL.
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            success_url: format!(
                "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                base
            ),
            cancel_url: format!("{}/billing/canceled", base),
        }
    }
}

pub struct CreateCheckoutHandler {
    ctx: BillingContext,
    urls: CheckoutUrls,
}

impl CreateCheckoutHandler {
    pub fn new(ctx: BillingContext, urls: CheckoutUrls) -> Self {
        Self { ctx, urls }
    }

    pub async fn handle(
        &self,
        cmd: CreateCheckoutCommand,
    ) -> Result<CreateCheckoutResult, BillingError> {
        let target = self.ctx.target(&cmd.plan)?;
        let interval: BillingInterval = cmd.interval.parse()?;

        let account = self.ctx.load_account(&cmd.user_id).await?;
        validate_transition(&account.state, PlanAction::Subscribe, Some(target))?;

        let price_ref = self.ctx.price_ref(target.plan, interval)?;

        // Reuse the processor customer from an earlier subscription, if any.
        let customer_ref = self
            .ctx
            .subscriptions
            .find_latest_by_user(&cmd.user_id)
            .await?
            .map(|record| record.external_customer_ref);

        let request = CheckoutRequest {
            user_id: cmd.user_id.clone(),
            email: Some(account.user.email.clone()).filter(|e| !e.is_empty()),
            customer_ref,
            price_ref,
            plan: target.plan,
            interval,
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        };

        let session = self
            .ctx
            .gateway
            .create_checkout_session(request)
            .await
            .map_err(|err| {
                tracing::error!(
                    user_id = %cmd.user_id,
                    kind = %err.kind,
                    hint = ?err.hint,
                    error = %err.message,
                    "Checkout session creation failed"
                );
                BillingError::from(err)
            })?;

        tracing::info!(
            user_id = %cmd.user_id,
            plan = %target.plan,
            interval = %interval,
            session_id = %session.id,
            "Checkout session created"
        );

        self.ctx
            .effects
            .dispatch(&[BillingEffect::audit(
                AuditEntry::new(cmd.user_id, AuditAction::CheckoutStarted)
                    .plans(Some(account.state.current_plan), Some(target.plan)),
            )])
            .await;

        Ok(CreateCheckoutResult {
            session_id: session.id,
            checkout_url: session.url,
            plan: target.plan,
            interval,
        })
    }
}
