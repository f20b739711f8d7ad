//! CancelSubscriptionHandler - Command handler for ending a subscription.
//!
//! Cancellation is scheduled for the end of the paid period. The user keeps
//! their plan until the processor reports the subscription deleted.

use crate::domain::billing::{
    validate_transition, AuditAction, AuditEntry, BillingEffect, BillingError, EmailKind,
    PlanAction, PlanId, SubscriptionRecord,
};
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};

use super::change_plan::period_end;
use super::context::gateway_failure;
use super::BillingContext;

/// Command to cancel the caller's subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
}

/// Result of a scheduled cancellation.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription_id: SubscriptionId,
    /// Plan the user keeps until `effective_at`.
    pub current_plan: PlanId,
    pub effective_at: Timestamp,
}

pub struct CancelSubscriptionHandler {
    ctx: BillingContext,
}

impl CancelSubscriptionHandler {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        let account = self.ctx.load_account(&cmd.user_id).await?;
        validate_transition(&account.state, PlanAction::Cancel, None)?;

        let Some(record) = account.record else {
            return Err(BillingError::NoActiveSubscription(cmd.user_id));
        };

        let lock = self.ctx.change_lock();
        let record = lock
            .run_locked(&record.id, |fresh| self.schedule(fresh))
            .await?;

        let effective_at = record
            .pending_plan_change_at
            .unwrap_or_else(Timestamp::now);

        tracing::info!(
            user_id = %record.user_id,
            subscription_id = %record.id,
            plan = %record.plan,
            "Cancellation scheduled"
        );

        self.ctx
            .effects
            .dispatch(&[
                BillingEffect::audit(
                    AuditEntry::new(record.user_id.clone(), AuditAction::CancellationScheduled)
                        .for_subscription(record.id)
                        .plans(Some(record.plan), Some(PlanId::Free)),
                ),
                BillingEffect::email(
                    record.user_email.clone(),
                    record.user_id.clone(),
                    EmailKind::CancellationScheduled,
                    record.plan,
                    Some(effective_at),
                ),
                BillingEffect::CancelPendingRefunds {
                    user_id: record.user_id.clone(),
                },
            ])
            .await;

        Ok(CancelSubscriptionResult {
            subscription_id: record.id,
            current_plan: record.plan,
            effective_at,
        })
    }

    async fn schedule(
        &self,
        mut record: SubscriptionRecord,
    ) -> Result<SubscriptionRecord, BillingError> {
        let state = self.ctx.state_for(&record).await?;
        validate_transition(&state, PlanAction::Cancel, None)?;

        let updated = self
            .ctx
            .gateway
            .cancel_subscription(&record.external_subscription_ref, true)
            .await
            .map_err(|err| gateway_failure("cancel_subscription", &record, err))?;

        let effective_at = period_end(&updated, &record);
        record.schedule_cancellation(effective_at)?;
        self.ctx.subscriptions.update(&record).await?;
        Ok(record)
    }
}
