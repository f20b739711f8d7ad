//! Subscription record aggregate.
//!
//! A record mirrors one external subscription object. It is mutated in place for
//! every plan change and relevant webhook, and never deleted; a fresh record is
//! created only when the processor issues a new subscription.
//!
//! # Invariants
//!
//! - `pending_plan` is set only while `status == Active`
//! - `pending_plan == Some(Free)` iff a cancellation is scheduled
//! - `processing_change` is owned by the lock manager; aggregate methods never
//!   touch it

use serde::{Deserialize, Serialize};

use super::{BillingInterval, PlanId};
use crate::domain::foundation::{
    DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

/// Persisted status of a subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(ValidationError::unknown_value("status", other)),
        }
    }
}

/// Lifecycle position derived from the persisted fields.
///
/// ```text
/// Active ──► PendingDowngrade ──► Active (applied / reverted / upgraded)
///   │               │
///   └──► Canceling ◄┘──► Active (reactivated)
///            │
///            └──► Canceled (terminal for this record)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    PendingDowngrade,
    Canceling,
    Canceled,
}

impl StateMachine for LifecycleState {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use LifecycleState::*;
        match self {
            Active | PendingDowngrade => vec![Active, PendingDowngrade, Canceling, Canceled],
            Canceling => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}

/// Data needed to open a record after a completed checkout.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub external_subscription_ref: String,
    pub external_customer_ref: String,
    pub user_email: String,
    pub plan: PlanId,
    pub interval: BillingInterval,
}

/// Internal mirror of one external subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub external_subscription_ref: String,
    pub external_customer_ref: String,
    pub user_email: String,
    /// Plan currently billed and in effect.
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    pub interval: BillingInterval,
    pub cancel_at_period_end: bool,
    /// Plan that takes effect at `pending_plan_change_at`.
    pub pending_plan: Option<PlanId>,
    pub pending_plan_change_at: Option<Timestamp>,
    /// Mutual-exclusion flag for user-initiated changes.
    pub processing_change: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub canceled_at: Option<Timestamp>,
}

impl SubscriptionRecord {
    /// Opens an active record for a freshly created external subscription.
    pub fn activate(new: NewSubscription) -> Self {
        let now = Timestamp::now();
        Self {
            id: SubscriptionId::new(),
            user_id: new.user_id,
            external_subscription_ref: new.external_subscription_ref,
            external_customer_ref: new.external_customer_ref,
            user_email: new.user_email,
            plan: new.plan,
            status: SubscriptionStatus::Active,
            interval: new.interval,
            cancel_at_period_end: false,
            pending_plan: None,
            pending_plan_change_at: None,
            processing_change: false,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }

    /// Derives the lifecycle position from the stored fields.
    pub fn lifecycle(&self) -> LifecycleState {
        if self.status == SubscriptionStatus::Canceled {
            LifecycleState::Canceled
        } else if self.cancellation_in_flight() {
            LifecycleState::Canceling
        } else if self.pending_plan.is_some() {
            LifecycleState::PendingDowngrade
        } else {
            LifecycleState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// True when the subscription is set to end at period end.
    pub fn cancellation_in_flight(&self) -> bool {
        self.cancel_at_period_end || self.pending_plan == Some(PlanId::Free)
    }

    /// Scheduled paid downgrade, if any.
    pub fn pending_downgrade(&self) -> Option<PlanId> {
        self.pending_plan.filter(PlanId::is_paid)
    }

    /// Applies an immediate upgrade and drops any stale scheduled change.
    pub fn apply_upgrade(&mut self, plan: PlanId) -> Result<(), DomainError> {
        self.transition_to(LifecycleState::Active)?;
        self.plan = plan;
        self.clear_pending();
        self.cancel_at_period_end = false;
        self.touch();
        Ok(())
    }

    /// Schedules a paid downgrade for the end of the period.
    pub fn schedule_downgrade(
        &mut self,
        plan: PlanId,
        effective_at: Timestamp,
    ) -> Result<(), DomainError> {
        if !plan.is_paid() {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                "Downgrading to the free plan is a cancellation",
            ));
        }
        self.transition_to(LifecycleState::PendingDowngrade)?;
        self.pending_plan = Some(plan);
        self.pending_plan_change_at = Some(effective_at);
        self.touch();
        Ok(())
    }

    /// Schedules the end of the subscription at period end.
    pub fn schedule_cancellation(&mut self, effective_at: Timestamp) -> Result<(), DomainError> {
        self.transition_to(LifecycleState::Canceling)?;
        self.cancel_at_period_end = true;
        self.pending_plan = Some(PlanId::Free);
        self.pending_plan_change_at = Some(effective_at);
        self.touch();
        Ok(())
    }

    /// Undoes a scheduled cancellation; the current plan stays in effect.
    pub fn reactivate(&mut self) -> Result<(), DomainError> {
        if self.lifecycle() != LifecycleState::Canceling {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                "Only a subscription scheduled for cancellation can be reactivated",
            ));
        }
        self.transition_to(LifecycleState::Active)?;
        self.cancel_at_period_end = false;
        self.clear_pending();
        self.touch();
        Ok(())
    }

    /// Drops a scheduled paid downgrade; the current plan stays in effect.
    pub fn revert_downgrade(&mut self) -> Result<(), DomainError> {
        if self.lifecycle() != LifecycleState::PendingDowngrade {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                "No scheduled downgrade to revert",
            ));
        }
        self.transition_to(LifecycleState::Active)?;
        self.clear_pending();
        self.touch();
        Ok(())
    }

    /// Makes a due paid downgrade the effective plan.
    ///
    /// Returns the newly effective plan, or `None` when nothing paid is pending.
    pub fn apply_pending_downgrade(&mut self) -> Result<Option<PlanId>, DomainError> {
        let Some(plan) = self.pending_downgrade() else {
            return Ok(None);
        };
        self.transition_to(LifecycleState::Active)?;
        self.plan = plan;
        self.clear_pending();
        self.touch();
        Ok(Some(plan))
    }

    /// Records a plan change made directly at the processor.
    pub fn replace_plan(&mut self, plan: PlanId) -> Result<(), DomainError> {
        self.transition_to(LifecycleState::Active)?;
        self.plan = plan;
        self.touch();
        Ok(())
    }

    /// Ends the record. Returns the plan the user falls back to.
    pub fn mark_canceled(&mut self) -> Result<PlanId, DomainError> {
        self.transition_to(LifecycleState::Canceled)?;
        let fallback = self.pending_plan.unwrap_or(PlanId::Free);
        let now = Timestamp::now();
        self.status = SubscriptionStatus::Canceled;
        self.canceled_at = Some(now);
        self.cancel_at_period_end = false;
        self.clear_pending();
        self.updated_at = now;
        Ok(fallback)
    }

    fn transition_to(&self, target: LifecycleState) -> Result<(), DomainError> {
        self.lifecycle().transition_to(target).map(|_| ()).map_err(|e| {
            DomainError::new(ErrorCode::InvalidStateTransition, e.to_string())
                .with_detail("subscription_id", self.id.to_string())
        })
    }

    fn clear_pending(&mut self) {
        self.pending_plan = None;
        self.pending_plan_change_at = None;
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Active monthly record for `user_id` on `plan`.
    pub fn active_record(user_id: &str, plan: PlanId) -> SubscriptionRecord {
        SubscriptionRecord::activate(NewSubscription {
            user_id: UserId::new(user_id).unwrap(),
            external_subscription_ref: format!("sub_{}", user_id),
            external_customer_ref: format!("cus_{}", user_id),
            user_email: format!("{}@example.com", user_id),
            plan,
            interval: BillingInterval::Monthly,
        })
    }
}
