//! ChangePlanHandler - Command handler for moving a subscriber to another plan.
//!
//! The requested plan is classified against the current state:
//!
//! | Target level      | State                     | Action            |
//! |-------------------|---------------------------|-------------------|
//! | higher            | any active                | upgrade now       |
//! | lower             | no cancellation scheduled | downgrade at end  |
//! | same              | cancellation scheduled    | reactivate        |
//! | same              | paid downgrade scheduled  | revert downgrade  |
//!
//! Reactivating over a paid downgrade that was scheduled before the
//! cancellation keeps that downgrade pending, since the processor already
//! bills the lower price.
//!
//! Each action performs exactly one gateway call under the change lock.

use crate::domain::billing::{
    classify_change, validate_transition, AuditAction, AuditEntry, BillingEffect, BillingError,
    EmailKind, PlanAction, PlanId, PlanTarget, SubscriptionRecord,
};
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};
use crate::ports::{ExternalSubscription, ProrationMode, SubscriptionModification};

use super::context::gateway_failure;
use super::BillingContext;

/// Command to change the plan of the caller's subscription.
#[derive(Debug, Clone)]
pub struct ChangePlanCommand {
    pub user_id: UserId,
    pub plan: String,
}

/// Result of a committed plan change.
#[derive(Debug, Clone)]
pub struct ChangePlanResult {
    pub action: PlanAction,
    pub subscription_id: SubscriptionId,
    /// Plan in effect right now.
    pub effective_plan: PlanId,
    /// Plan scheduled for the end of the period, if any.
    pub pending_plan: Option<PlanId>,
    pub effective_at: Option<Timestamp>,
}

pub struct ChangePlanHandler {
    ctx: BillingContext,
}

impl ChangePlanHandler {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, cmd: ChangePlanCommand) -> Result<ChangePlanResult, BillingError> {
        let target = self.ctx.target(&cmd.plan)?;
        let account = self.ctx.load_account(&cmd.user_id).await?;

        let action = classify_change(&account.state, target)?;
        validate_transition(&account.state, action, Some(target))?;

        let Some(record) = account.record else {
            return Err(BillingError::NoActiveSubscription(cmd.user_id));
        };

        if action == PlanAction::Downgrade {
            self.ensure_within_limits(&cmd.user_id, target).await?;
        }

        let lock = self.ctx.change_lock();
        let (result, effects) = lock
            .run_locked(&record.id, |fresh| self.apply(fresh, action, target))
            .await?;

        self.ctx.effects.dispatch(&effects).await;
        Ok(result)
    }

    async fn ensure_within_limits(
        &self,
        user_id: &UserId,
        target: PlanTarget,
    ) -> Result<(), BillingError> {
        let plan = self
            .ctx
            .catalog
            .get(target.plan)
            .ok_or_else(|| BillingError::InvalidPlan(target.plan.to_string()))?;
        let usage = self.ctx.usage.usage_for(user_id).await?;
        let violations = plan.limits.violations(&usage);
        if violations.is_empty() {
            return Ok(());
        }

        tracing::info!(
            user_id = %user_id,
            target_plan = %target.plan,
            violations = violations.len(),
            "Downgrade blocked by plan limits"
        );
        Err(BillingError::DowngradeLimitsExceeded(violations))
    }

    /// Critical section: re-check against the locked record, call the gateway
    /// once, then persist.
    async fn apply(
        &self,
        mut record: SubscriptionRecord,
        action: PlanAction,
        target: PlanTarget,
    ) -> Result<(ChangePlanResult, Vec<BillingEffect>), BillingError> {
        let state = self.ctx.state_for(&record).await?;
        if classify_change(&state, target)? != action {
            return Err(BillingError::InvalidState(format!(
                "subscription {} changed before the {} could start",
                record.id, action
            )));
        }
        validate_transition(&state, action, Some(target))?;

        let from_plan = record.plan;
        let mut effects = Vec::new();

        match action {
            PlanAction::Upgrade => {
                let price = self.ctx.price_ref(target.plan, record.interval)?;
                self.modify(
                    &record,
                    SubscriptionModification::change_price(price, ProrationMode::ImmediateWithInvoice)
                        .with_metadata("plan", target.plan.as_str()),
                )
                .await?;

                record.apply_upgrade(target.plan)?;
                self.ctx.subscriptions.update(&record).await?;
                self.ctx.users.set_plan(&record.user_id, target.plan).await?;

                effects.push(self.audit(&record, AuditAction::Upgraded, from_plan, target.plan));
                effects.push(self.email(&record, EmailKind::UpgradeConfirmation, target.plan, None));
            }
            PlanAction::Downgrade => {
                let price = self.ctx.price_ref(target.plan, record.interval)?;
                let updated = self
                    .modify(
                        &record,
                        SubscriptionModification::change_price(price, ProrationMode::None)
                            .with_metadata("pending_plan", target.plan.as_str()),
                    )
                    .await?;

                let effective_at = period_end(&updated, &record);
                record.schedule_downgrade(target.plan, effective_at)?;
                self.ctx.subscriptions.update(&record).await?;

                effects.push(self.audit(&record, AuditAction::DowngradeScheduled, from_plan, target.plan));
                effects.push(self.email(
                    &record,
                    EmailKind::DowngradeScheduled,
                    target.plan,
                    Some(effective_at),
                ));
            }
            PlanAction::Reactivate => {
                let resumed = self.modify(&record, SubscriptionModification::resume()).await?;

                record.reactivate()?;
                // A paid downgrade scheduled before the cancellation already
                // moved the processor price; keep it pending instead of
                // silently restoring the higher plan.
                if let Some(billed) = self.billed_downgrade(&resumed, &record) {
                    record.schedule_downgrade(billed, period_end(&resumed, &record))?;
                    tracing::info!(
                        subscription_id = %record.id,
                        pending_plan = %billed,
                        "Reactivation keeps scheduled downgrade"
                    );
                }
                self.ctx.subscriptions.update(&record).await?;
                self.ctx.users.set_plan(&record.user_id, record.plan).await?;

                effects.push(self.audit(&record, AuditAction::Reactivated, from_plan, record.plan));
                effects.push(self.email(
                    &record,
                    EmailKind::ReactivationConfirmation,
                    record.plan,
                    None,
                ));
            }
            PlanAction::RevertDowngrade => {
                let price = self.ctx.price_ref(record.plan, record.interval)?;
                self.modify(
                    &record,
                    SubscriptionModification::change_price(price, ProrationMode::None),
                )
                .await?;

                record.revert_downgrade()?;
                self.ctx.subscriptions.update(&record).await?;

                effects.push(self.audit(&record, AuditAction::DowngradeReverted, from_plan, record.plan));
            }
            PlanAction::Subscribe | PlanAction::Cancel => {
                return Err(BillingError::InvalidState(format!(
                    "{} is not a plan change",
                    action
                )));
            }
        }

        tracing::info!(
            user_id = %record.user_id,
            subscription_id = %record.id,
            action = %action,
            from_plan = %from_plan,
            to_plan = %target.plan,
            "Plan change committed"
        );

        let result = ChangePlanResult {
            action,
            subscription_id: record.id,
            effective_plan: record.plan,
            pending_plan: record.pending_plan,
            effective_at: record.pending_plan_change_at,
        };
        Ok((result, effects))
    }

    /// Lower paid plan the processor is billing for, if any.
    fn billed_downgrade(
        &self,
        external: &ExternalSubscription,
        record: &SubscriptionRecord,
    ) -> Option<PlanId> {
        let price_ref = external.price_ref.as_deref()?;
        let (plan, _) = self.ctx.catalog.plan_for_price_ref(price_ref)?;
        (plan.is_paid() && self.ctx.level(plan) < self.ctx.level(record.plan)).then_some(plan)
    }

    async fn modify(
        &self,
        record: &SubscriptionRecord,
        modification: SubscriptionModification,
    ) -> Result<ExternalSubscription, BillingError> {
        self.ctx
            .gateway
            .modify_subscription(&record.external_subscription_ref, modification)
            .await
            .map_err(|err| gateway_failure("modify_subscription", record, err))
    }

    fn audit(
        &self,
        record: &SubscriptionRecord,
        action: AuditAction,
        from: PlanId,
        to: PlanId,
    ) -> BillingEffect {
        BillingEffect::audit(
            AuditEntry::new(record.user_id.clone(), action)
                .for_subscription(record.id)
                .plans(Some(from), Some(to)),
        )
    }

    fn email(
        &self,
        record: &SubscriptionRecord,
        kind: EmailKind,
        plan: PlanId,
        effective_at: Option<Timestamp>,
    ) -> BillingEffect {
        BillingEffect::email(
            record.user_email.clone(),
            record.user_id.clone(),
            kind,
            plan,
            effective_at,
        )
    }
}

/// End of the current period as reported by the processor.
///
/// Falls back to one interval from now when the processor omits it.
pub(crate) fn period_end(updated: &ExternalSubscription, record: &SubscriptionRecord) -> Timestamp {
    updated.period_end().unwrap_or_else(|| {
        tracing::warn!(
            subscription_id = %record.id,
            "Processor returned no period end; assuming one full interval"
        );
        Timestamp::now().add_days(record.interval.days())
    })
}
