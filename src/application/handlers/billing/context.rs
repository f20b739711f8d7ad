//! Shared dependencies and lookups for billing handlers.

use std::sync::Arc;

use super::{ChangeLock, EffectDispatcher};
use crate::domain::billing::{
    BillingError, BillingInterval, GatewayFailure, Plan, PlanCatalog, PlanId, PlanTarget,
    SubscriptionRecord, SubscriptionState,
};
use crate::domain::foundation::UserId;
use crate::ports::{
    BillingGateway, GalleryCleaner, GatewayError, RefundDesk, SubscriptionRepository, UsageEvaluator,
    UserAccount, UserDirectory,
};

/// Ports and collaborators every billing handler draws from.
#[derive(Clone)]
pub struct BillingContext {
    pub users: Arc<dyn UserDirectory>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub gateway: Arc<dyn BillingGateway>,
    pub usage: Arc<dyn UsageEvaluator>,
    pub galleries: Arc<dyn GalleryCleaner>,
    pub refunds: Arc<dyn RefundDesk>,
    pub catalog: Arc<PlanCatalog>,
    pub effects: Arc<EffectDispatcher>,
}

/// A user together with their active subscription, as transitions see them.
#[derive(Debug, Clone)]
pub(crate) struct Account {
    pub user: UserAccount,
    pub record: Option<SubscriptionRecord>,
    pub state: SubscriptionState,
}

impl BillingContext {
    pub fn change_lock(&self) -> ChangeLock {
        ChangeLock::new(self.subscriptions.clone())
    }

    /// Normalizes a requested plan and resolves it in the catalog.
    pub(crate) fn plan(&self, raw: &str) -> Result<&Plan, BillingError> {
        let id = PlanId::normalize(raw)?;
        self.catalog
            .get(id)
            .ok_or_else(|| BillingError::InvalidPlan(raw.to_string()))
    }

    pub(crate) fn target(&self, raw: &str) -> Result<PlanTarget, BillingError> {
        self.plan(raw).map(PlanTarget::from)
    }

    pub(crate) fn level(&self, plan: PlanId) -> u8 {
        self.catalog.level(plan).unwrap_or_default()
    }

    /// Processor price for a plan, or a misconfiguration error naming the setting.
    pub(crate) fn price_ref(
        &self,
        plan: PlanId,
        interval: BillingInterval,
    ) -> Result<String, BillingError> {
        self.catalog
            .get(plan)
            .and_then(|p| p.price_ref(interval))
            .map(str::to_string)
            .ok_or_else(|| {
                tracing::error!(plan = %plan, interval = %interval, "No processor price configured");
                BillingError::Gateway {
                    failure: GatewayFailure::Misconfigured,
                    message: format!("No price reference for {} {}", plan, interval),
                    hint: Some(format!(
                        "Set GALLERY_BILLING__PAYMENT__PRICES__{}_{}",
                        plan.as_str().to_ascii_uppercase(),
                        interval.as_str().to_ascii_uppercase()
                    )),
                }
            })
    }

    /// Loads the user, their active record and the transition state.
    pub(crate) async fn load_account(&self, user_id: &UserId) -> Result<Account, BillingError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.clone()))?;

        let record = self
            .subscriptions
            .find_latest_by_user(user_id)
            .await?
            .filter(SubscriptionRecord::is_active);

        let state = match &record {
            Some(record) => self.state_for(record).await?,
            None => SubscriptionState::unsubscribed(user.plan, self.level(user.plan)),
        };

        Ok(Account {
            user,
            record,
            state,
        })
    }

    /// Transition state for an active record.
    pub(crate) async fn state_for(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<SubscriptionState, BillingError> {
        let refund_pending = self.refunds.has_pending_refund(&record.user_id).await?;
        Ok(SubscriptionState::from_record(
            record,
            self.level(record.plan),
            refund_pending,
        ))
    }
}

/// Logs a failed gateway call and converts it for the caller.
pub(crate) fn gateway_failure(
    operation: &'static str,
    record: &SubscriptionRecord,
    err: GatewayError,
) -> BillingError {
    tracing::error!(
        operation,
        subscription_id = %record.id,
        user_id = %record.user_id,
        kind = %err.kind,
        code = ?err.code,
        hint = ?err.hint,
        error = %err.message,
        "Payment gateway call failed"
    );
    err.into()
}
