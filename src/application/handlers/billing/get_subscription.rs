//! GetSubscriptionHandler - Query handler for the caller's billing overview.

use crate::domain::billing::{BillingError, LifecycleState, Plan, SubscriptionRecord};
use crate::domain::foundation::UserId;

use super::BillingContext;

#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct GetSubscriptionResult {
    /// Plan currently in effect, with its limits.
    pub effective_plan: Plan,
    /// Most recent subscription record, active or not.
    pub subscription: Option<SubscriptionRecord>,
}

impl GetSubscriptionResult {
    pub fn lifecycle(&self) -> Option<LifecycleState> {
        self.subscription.as_ref().map(SubscriptionRecord::lifecycle)
    }
}

pub struct GetSubscriptionHandler {
    ctx: BillingContext,
}

impl GetSubscriptionHandler {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<GetSubscriptionResult, BillingError> {
        let user = self
            .ctx
            .users
            .find_by_id(&query.user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(query.user_id.clone()))?;

        let subscription = self
            .ctx
            .subscriptions
            .find_latest_by_user(&query.user_id)
            .await?;

        let effective_plan = self
            .ctx
            .catalog
            .get(user.plan)
            .cloned()
            .ok_or_else(|| BillingError::InvalidPlan(user.plan.to_string()))?;

        Ok(GetSubscriptionResult {
            effective_plan,
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::domain::billing::PlanId;
    use crate::domain::foundation::Timestamp;
    use crate::ports::SubscriptionRepository;

    #[tokio::test]
    async fn reports_pending_downgrade_alongside_effective_plan() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Pro).await;
        record
            .schedule_downgrade(PlanId::Plus, Timestamp::now().add_days(3))
            .unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let result = GetSubscriptionHandler::new(h.ctx.clone())
            .handle(GetSubscriptionQuery {
                user_id: record.user_id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(result.effective_plan.id, PlanId::Pro);
        assert_eq!(result.lifecycle(), Some(LifecycleState::PendingDowngrade));
        assert_eq!(
            result.subscription.and_then(|s| s.pending_plan),
            Some(PlanId::Plus)
        );
    }

    #[tokio::test]
    async fn free_user_has_no_subscription() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Free);

        let result = GetSubscriptionHandler::new(h.ctx.clone())
            .handle(GetSubscriptionQuery { user_id: user })
            .await
            .unwrap();

        assert_eq!(result.effective_plan.id, PlanId::Free);
        assert!(result.subscription.is_none());
        assert_eq!(result.effective_plan.limits.max_galleries, Some(3));
    }
}
