//! Data Transfer Objects for billing HTTP endpoints.
//!
//! These types define the JSON request/response shapes for the REST API.
//! They are separate from domain types so the wire format can stay stable
//! while the domain evolves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::handlers::billing::{
    CancelSubscriptionResult, ChangePlanResult, CheckDowngradeResult, CreateCheckoutResult,
    DowngradeWithCleanupResult, GetSubscriptionResult, HandleBillingWebhookResult,
    WebhookDisposition,
};
use crate::domain::billing::{
    BillingRecord, LifecycleState, LimitViolation, Plan, PlanAction, PlanId, PlanLimits,
    SubscriptionRecord, UsageSnapshot,
};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a hosted checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
    /// `monthly` or `annual`. Defaults to monthly.
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "monthly".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

/// Query string of `GET /billing/subscription/check-downgrade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDowngradeParams {
    pub target_plan: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeWithCleanupRequest {
    pub target_plan: String,
    #[serde(default)]
    pub galleries_to_delete: Vec<String>,
}

/// Query string of `GET /billing/history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
    pub plan: PlanId,
    pub interval: String,
}

impl From<CreateCheckoutResult> for CheckoutResponse {
    fn from(result: CreateCheckoutResult) -> Self {
        Self {
            session_id: result.session_id,
            checkout_url: result.checkout_url,
            plan: result.plan,
            interval: result.interval.as_str().to_string(),
        }
    }
}

/// Outcome of a plan change.
#[derive(Debug, Clone, Serialize)]
pub struct PlanChangeResponse {
    pub action: PlanAction,
    pub subscription_id: String,
    pub effective_plan: PlanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_plan: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<DateTime<Utc>>,
}

impl From<ChangePlanResult> for PlanChangeResponse {
    fn from(result: ChangePlanResult) -> Self {
        Self {
            action: result.action,
            subscription_id: result.subscription_id.to_string(),
            effective_plan: result.effective_plan,
            pending_plan: result.pending_plan,
            effective_at: result.effective_at.map(|t| *t.as_datetime()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub subscription_id: String,
    /// Plan kept until `effective_at`.
    pub current_plan: PlanId,
    pub effective_at: DateTime<Utc>,
}

impl From<CancelSubscriptionResult> for CancelResponse {
    fn from(result: CancelSubscriptionResult) -> Self {
        Self {
            subscription_id: result.subscription_id.to_string(),
            current_plan: result.current_plan,
            effective_at: *result.effective_at.as_datetime(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckDowngradeResponse {
    pub current_plan: PlanId,
    pub target_plan: PlanId,
    pub allowed: bool,
    pub usage: UsageSnapshot,
    pub violations: Vec<LimitViolation>,
}

impl From<CheckDowngradeResult> for CheckDowngradeResponse {
    fn from(result: CheckDowngradeResult) -> Self {
        Self {
            allowed: result.allowed(),
            current_plan: result.current_plan,
            target_plan: result.target_plan,
            usage: result.usage,
            violations: result.violations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DowngradeResponse {
    pub deleted_galleries: u32,
    #[serde(flatten)]
    pub change: PlanChangeResponse,
}

impl From<DowngradeWithCleanupResult> for DowngradeResponse {
    fn from(result: DowngradeWithCleanupResult) -> Self {
        Self {
            deleted_galleries: result.deleted_galleries,
            change: result.change.into(),
        }
    }
}

/// Plan details shown alongside the subscription.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: PlanId,
    pub display_name: String,
    pub monthly_price: i64,
    pub annual_price: i64,
    pub limits: PlanLimits,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            display_name: plan.display_name,
            monthly_price: plan.monthly_price,
            annual_price: plan.annual_price,
            limits: plan.limits,
        }
    }
}

/// Subscription record without processor identifiers.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    pub plan: PlanId,
    pub state: LifecycleState,
    pub interval: String,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_plan: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_plan_change_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<SubscriptionRecord> for SubscriptionView {
    fn from(record: SubscriptionRecord) -> Self {
        Self {
            id: record.id.to_string(),
            plan: record.plan,
            state: record.lifecycle(),
            interval: record.interval.as_str().to_string(),
            cancel_at_period_end: record.cancel_at_period_end,
            pending_plan: record.pending_plan,
            pending_plan_change_at: record.pending_plan_change_at.map(|t| *t.as_datetime()),
            created_at: *record.created_at.as_datetime(),
            canceled_at: record.canceled_at.map(|t| *t.as_datetime()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub plan: PlanResponse,
    pub subscription: Option<SubscriptionView>,
}

impl From<GetSubscriptionResult> for SubscriptionResponse {
    fn from(result: GetSubscriptionResult) -> Self {
        Self {
            plan: result.effective_plan.into(),
            subscription: result.subscription.map(SubscriptionView::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingRecordView {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanId>,
    pub created_at: DateTime<Utc>,
}

impl From<BillingRecord> for BillingRecordView {
    fn from(record: BillingRecord) -> Self {
        Self {
            id: record.id.to_string(),
            amount: record.amount,
            currency: record.currency,
            status: record.status,
            plan: record.plan,
            created_at: *record.created_at.as_datetime(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingHistoryResponse {
    pub records: Vec<BillingRecordView>,
}

/// Acknowledgement returned to the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    /// `applied`, `ignored`, `duplicate` or `failed`.
    pub outcome: String,
}

impl From<HandleBillingWebhookResult> for WebhookAck {
    fn from(result: HandleBillingWebhookResult) -> Self {
        let outcome = match result.disposition {
            WebhookDisposition::Applied(_) => "applied",
            WebhookDisposition::Ignored(_) => "ignored",
            WebhookDisposition::Duplicate => "duplicate",
            WebhookDisposition::Failed(_) => "failed",
        };
        Self {
            received: true,
            event_id: result.event_id,
            outcome: outcome.to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
