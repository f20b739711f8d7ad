//! Plan transition validation.
//!
//! Pure decision functions: given a snapshot of the user's subscription state and a
//! requested action, decide whether the action may proceed. Nothing here performs
//! I/O, so handlers call it before taking the change lock.

use serde::Serialize;
use std::fmt;

use super::{Plan, PlanId, SubscriptionRecord};

/// Snapshot of everything a transition decision depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    /// Normalized effective plan.
    pub current_plan: PlanId,
    pub current_level: u8,
    /// An active record on a paid plan exists.
    pub has_paid_subscription: bool,
    pub cancel_at_period_end: bool,
    pub pending_plan: Option<PlanId>,
    /// A refund request is open in the refund subsystem.
    pub refund_pending: bool,
}

impl SubscriptionState {
    /// State for a user without an active subscription record.
    pub fn unsubscribed(current_plan: PlanId, current_level: u8) -> Self {
        Self {
            current_plan,
            current_level,
            has_paid_subscription: false,
            cancel_at_period_end: false,
            pending_plan: None,
            refund_pending: false,
        }
    }

    /// State derived from an active record.
    pub fn from_record(record: &SubscriptionRecord, current_level: u8, refund_pending: bool) -> Self {
        Self {
            current_plan: record.plan,
            current_level,
            has_paid_subscription: record.is_active() && record.plan.is_paid(),
            cancel_at_period_end: record.cancel_at_period_end,
            pending_plan: record.pending_plan,
            refund_pending,
        }
    }

    fn cancellation_in_flight(&self) -> bool {
        self.cancel_at_period_end || self.pending_plan == Some(PlanId::Free)
    }

    fn pending_downgrade(&self) -> Option<PlanId> {
        self.pending_plan.filter(PlanId::is_paid)
    }
}

/// Plan and level a request is aiming for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanTarget {
    pub plan: PlanId,
    pub level: u8,
}

impl From<&Plan> for PlanTarget {
    fn from(plan: &Plan) -> Self {
        Self {
            plan: plan.id,
            level: plan.level,
        }
    }
}

/// User-requested lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Subscribe,
    Upgrade,
    Downgrade,
    Cancel,
    Reactivate,
    /// Return to the current plan while a paid downgrade is scheduled.
    RevertDowngrade,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanAction::Subscribe => "subscribe",
            PlanAction::Upgrade => "upgrade",
            PlanAction::Downgrade => "downgrade",
            PlanAction::Cancel => "cancel",
            PlanAction::Reactivate => "reactivate",
            PlanAction::RevertDowngrade => "revert_downgrade",
        };
        write!(f, "{}", s)
    }
}

/// Machine-readable reason for a denied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    InvalidPlan,
    SamePlan,
    AlreadySubscribed,
    UseChangePlan,
    CancelRequired,
    NoActiveSubscription,
    InvalidTransition,
    RefundPending,
    SubscriptionCanceled,
    NothingToCancel,
    NotCanceling,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::InvalidPlan => "INVALID_PLAN",
            RejectionCode::SamePlan => "SAME_PLAN",
            RejectionCode::AlreadySubscribed => "ALREADY_SUBSCRIBED",
            RejectionCode::UseChangePlan => "USE_CHANGE_PLAN",
            RejectionCode::CancelRequired => "CANCEL_REQUIRED",
            RejectionCode::NoActiveSubscription => "NO_ACTIVE_SUBSCRIPTION",
            RejectionCode::InvalidTransition => "INVALID_TRANSITION",
            RejectionCode::RefundPending => "REFUND_PENDING",
            RejectionCode::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            RejectionCode::NothingToCancel => "NOTHING_TO_CANCEL",
            RejectionCode::NotCanceling => "NOT_CANCELING",
        }
    }

    /// Conflicts describe the account's current situation rather than a bad request.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RejectionCode::AlreadySubscribed
                | RejectionCode::UseChangePlan
                | RejectionCode::RefundPending
                | RejectionCode::SubscriptionCanceled
        )
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A denied transition with a user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRejection {
    pub code: RejectionCode,
    pub reason: String,
}

impl TransitionRejection {
    fn new(code: RejectionCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Decides which action a change-plan request to `target` amounts to.
pub fn classify_change(
    state: &SubscriptionState,
    target: PlanTarget,
) -> Result<PlanAction, TransitionRejection> {
    if target.plan == PlanId::Free {
        return Err(cancel_required());
    }
    if !state.has_paid_subscription {
        return Err(no_active_subscription());
    }

    if target.level > state.current_level {
        Ok(PlanAction::Upgrade)
    } else if target.level < state.current_level {
        Ok(PlanAction::Downgrade)
    } else if state.cancellation_in_flight() {
        Ok(PlanAction::Reactivate)
    } else if state.pending_downgrade().is_some() {
        Ok(PlanAction::RevertDowngrade)
    } else {
        Err(TransitionRejection::new(
            RejectionCode::SamePlan,
            format!("You are already on the {} plan", state.current_plan),
        ))
    }
}

/// Decides whether `action` towards `target` is allowed from `state`.
pub fn validate_transition(
    state: &SubscriptionState,
    action: PlanAction,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    match action {
        PlanAction::Subscribe => validate_subscribe(state, target),
        PlanAction::Upgrade | PlanAction::Downgrade => validate_change(state, action, target),
        PlanAction::Cancel => validate_cancel(state),
        PlanAction::Reactivate => validate_reactivate(state, target),
        PlanAction::RevertDowngrade => validate_revert(state, target),
    }
}

fn validate_subscribe(
    state: &SubscriptionState,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    let target = require_target(target)?;
    if !target.plan.is_paid() {
        return Err(TransitionRejection::new(
            RejectionCode::InvalidPlan,
            "The free plan does not require a subscription",
        ));
    }
    if state.has_paid_subscription {
        if state.current_plan == target.plan {
            return Err(TransitionRejection::new(
                RejectionCode::AlreadySubscribed,
                format!("You are already subscribed to the {} plan", target.plan),
            ));
        }
        return Err(TransitionRejection::new(
            RejectionCode::UseChangePlan,
            "You already have a subscription; change your plan instead",
        ));
    }
    Ok(())
}

fn validate_change(
    state: &SubscriptionState,
    action: PlanAction,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    let target = require_target(target)?;
    if target.plan == PlanId::Free {
        return Err(cancel_required());
    }
    if !state.has_paid_subscription {
        return Err(no_active_subscription());
    }

    let direction_matches = match action {
        PlanAction::Upgrade => target.level > state.current_level,
        _ => target.level < state.current_level,
    };
    if !direction_matches {
        return Err(TransitionRejection::new(
            RejectionCode::InvalidTransition,
            format!(
                "Moving from {} to {} is not an {}",
                state.current_plan, target.plan, action
            ),
        ));
    }

    if state.refund_pending {
        return Err(refund_pending());
    }
    if state.cancellation_in_flight() {
        return Err(TransitionRejection::new(
            RejectionCode::SubscriptionCanceled,
            "Your subscription is scheduled to end; reactivate it before changing plans",
        ));
    }
    Ok(())
}

fn validate_cancel(state: &SubscriptionState) -> Result<(), TransitionRejection> {
    if !state.has_paid_subscription || state.current_plan == PlanId::Free {
        return Err(TransitionRejection::new(
            RejectionCode::NothingToCancel,
            "You are on the free plan; there is nothing to cancel",
        ));
    }
    if state.cancellation_in_flight() {
        return Err(TransitionRejection::new(
            RejectionCode::SubscriptionCanceled,
            "Your subscription is already scheduled to end",
        ));
    }
    Ok(())
}

fn validate_reactivate(
    state: &SubscriptionState,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    if !state.has_paid_subscription {
        return Err(no_active_subscription());
    }
    if !state.cancellation_in_flight() {
        return Err(TransitionRejection::new(
            RejectionCode::NotCanceling,
            "Your subscription is not scheduled to end",
        ));
    }
    returning_to_current_plan(state, target)
}

fn validate_revert(
    state: &SubscriptionState,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    if !state.has_paid_subscription {
        return Err(no_active_subscription());
    }
    if state.pending_downgrade().is_none() {
        return Err(TransitionRejection::new(
            RejectionCode::InvalidTransition,
            "No downgrade is scheduled",
        ));
    }
    if state.refund_pending {
        return Err(refund_pending());
    }
    returning_to_current_plan(state, target)
}

fn returning_to_current_plan(
    state: &SubscriptionState,
    target: Option<PlanTarget>,
) -> Result<(), TransitionRejection> {
    match target {
        Some(target) if target.plan != state.current_plan => Err(TransitionRejection::new(
            RejectionCode::InvalidTransition,
            format!(
                "Only the current {} plan can be restored",
                state.current_plan
            ),
        )),
        _ => Ok(()),
    }
}

fn require_target(target: Option<PlanTarget>) -> Result<PlanTarget, TransitionRejection> {
    target.ok_or_else(|| TransitionRejection::new(RejectionCode::InvalidPlan, "A target plan is required"))
}

fn cancel_required() -> TransitionRejection {
    TransitionRejection::new(
        RejectionCode::CancelRequired,
        "To move to the free plan, cancel your subscription",
    )
}

fn no_active_subscription() -> TransitionRejection {
    TransitionRejection::new(
        RejectionCode::NoActiveSubscription,
        "You do not have an active paid subscription",
    )
}

fn refund_pending() -> TransitionRejection {
    TransitionRejection::new(
        RejectionCode::RefundPending,
        "A refund request is being processed; plan changes are paused until it completes",
    )
}
