//! Billing gateway port for the external payment processor.
//!
//! Defines the contract for processor integrations (e.g., Stripe).
//! Implementations own checkout sessions and the processor-side subscription
//! object; the subscription record in our store mirrors that object.
//!
//! # Design
//!
//! - **Typed failures**: every error is classified once, by the adapter, into
//!   a `GatewayErrorKind`; callers never inspect processor message text
//! - **One call per mutation**: a plan change performs exactly one mutating call

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{BillingError, BillingInterval, GatewayFailure, PlanId};
use crate::domain::foundation::{Timestamp, UserId};

/// Port for the payment processor.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Create a hosted checkout session for a new subscription.
    ///
    /// The session carries `{user_id, plan, interval}` metadata that the
    /// completion webhook uses to open the subscription record.
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, GatewayError>;

    /// Change price, proration behaviour or the cancel flag of a subscription.
    async fn modify_subscription(
        &self,
        subscription_ref: &str,
        modification: SubscriptionModification,
    ) -> Result<ExternalSubscription, GatewayError>;

    /// Cancel a subscription.
    ///
    /// With `at_period_end` the subscription stays active until the period ends;
    /// otherwise it ends immediately.
    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        at_period_end: bool,
    ) -> Result<ExternalSubscription, GatewayError>;

    async fn retrieve_customer(&self, customer_ref: &str)
        -> Result<ExternalCustomer, GatewayError>;
}

/// Request to create a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,

    /// Customer email for pre-fill.
    pub email: Option<String>,

    /// Existing processor customer to reuse, if the user had one before.
    pub customer_ref: Option<String>,

    /// Processor price for the plan and interval.
    pub price_ref: String,

    pub plan: PlanId,
    pub interval: BillingInterval,

    /// URL to redirect after successful checkout.
    pub success_url: String,

    /// URL to redirect after abandoned checkout.
    pub cancel_url: String,
}

/// Checkout session for payment completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID.
    pub id: String,

    /// URL for customer to complete checkout.
    pub url: String,
}

/// Processor-side subscription, reduced to what reconciliation reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSubscription {
    pub id: String,
    pub customer_ref: String,
    /// Processor status string (`active`, `past_due`, `canceled`, ...).
    pub status: String,
    pub cancel_at_period_end: bool,
    /// Current billing period end (Unix timestamp).
    pub current_period_end: Option<i64>,
    /// Price of the first subscription item.
    pub price_ref: Option<String>,
    /// Id of the first subscription item, needed to swap its price.
    pub item_ref: Option<String>,
}

impl ExternalSubscription {
    pub fn period_end(&self) -> Option<Timestamp> {
        self.current_period_end.and_then(Timestamp::from_unix_secs)
    }
}

/// How the processor bills a mid-period price change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationMode {
    /// Prorate and invoice the difference right away.
    ImmediateWithInvoice,
    /// No proration; the new price applies from the next period.
    None,
}

impl ProrationMode {
    /// Stripe `proration_behavior` value.
    pub fn as_stripe(&self) -> &'static str {
        match self {
            ProrationMode::ImmediateWithInvoice => "always_invoice",
            ProrationMode::None => "none",
        }
    }
}

/// Changes to apply to an existing subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionModification {
    /// New price for the subscription's single item.
    pub price_ref: Option<String>,
    pub proration: ProrationMode,
    pub cancel_at_period_end: Option<bool>,
    pub metadata: HashMap<String, String>,
}

impl SubscriptionModification {
    /// Swap the subscription's price.
    pub fn change_price(price_ref: impl Into<String>, proration: ProrationMode) -> Self {
        Self {
            price_ref: Some(price_ref.into()),
            proration,
            cancel_at_period_end: None,
            metadata: HashMap::new(),
        }
    }

    /// Clear a scheduled cancellation without touching the price.
    pub fn resume() -> Self {
        Self {
            price_ref: None,
            proration: ProrationMode::None,
            cancel_at_period_end: Some(false),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when the modification changes what the customer pays.
    pub fn changes_price(&self) -> bool {
        self.price_ref.is_some()
    }
}

/// Processor-side customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Failure category, decided by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Keys, permissions or request shape are wrong. Fatal until fixed.
    Configuration,
    /// Test-mode object used with a live key or the reverse.
    ModeMismatch,
    /// The referenced processor object does not exist.
    NotFound,
    /// The processor refused or failed the request.
    Processor,
    /// The processor could not be reached.
    Network,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorKind::Configuration => "configuration",
            GatewayErrorKind::ModeMismatch => "mode_mismatch",
            GatewayErrorKind::NotFound => "not_found",
            GatewayErrorKind::Processor => "processor",
            GatewayErrorKind::Network => "network",
        };
        write!(f, "{}", s)
    }
}

/// Errors from billing gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,

    /// Processor's error code (if available).
    pub code: Option<String>,

    /// Processor message. Logged, never shown to users.
    pub message: String,

    /// Operator remediation hint.
    pub hint: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }

    pub fn processor(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Processor, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Configuration, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorKind::NotFound, format!("{} not found", resource))
    }

    /// Check if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Network | GatewayErrorKind::Processor
        )
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        let failure = match err.kind {
            GatewayErrorKind::Configuration | GatewayErrorKind::ModeMismatch => {
                GatewayFailure::Misconfigured
            }
            GatewayErrorKind::NotFound | GatewayErrorKind::Processor => GatewayFailure::Rejected,
            GatewayErrorKind::Network => GatewayFailure::Unavailable,
        };
        BillingError::Gateway {
            failure,
            message: err.to_string(),
            hint: err.hint,
        }
    }
}
