//! Billing error types.
//!
//! `BillingError` is what every orchestrator entry point returns. Each variant
//! carries a stable machine-readable code and a message safe to show users.

use thiserror::Error;

use super::{LimitViolation, RejectionCode, TransitionRejection};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, UserId, ValidationError};

/// How a payment gateway call failed, as far as callers care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayFailure {
    /// Keys, secrets or price references are wrong. Needs an operator.
    Misconfigured,
    /// The processor refused the request.
    Rejected,
    /// The processor could not be reached.
    Unavailable,
}

/// Errors surfaced by billing commands and queries.
#[derive(Debug, Clone, Error)]
pub enum BillingError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid billing interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("No active subscription for user {0}")]
    NoActiveSubscription(UserId),

    #[error("Transition rejected ({}): {}", .0.code, .0.reason)]
    Rejected(TransitionRejection),

    #[error("Subscription {0} is already processing a plan change")]
    ProcessingChange(SubscriptionId),

    #[error("Downgrade blocked by {} limit violation(s)", .0.len())]
    DowngradeLimitsExceeded(Vec<LimitViolation>),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Gateway failure ({failure:?}): {message}")]
    Gateway {
        failure: GatewayFailure,
        message: String,
        hint: Option<String>,
    },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BillingError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidPlan(_) => "INVALID_PLAN",
            BillingError::InvalidInterval(_) => "INVALID_INTERVAL",
            BillingError::InvalidRequest(_) => "VALIDATION_FAILED",
            BillingError::UserNotFound(_) => "USER_NOT_FOUND",
            BillingError::NoActiveSubscription(_) => "NO_ACTIVE_SUBSCRIPTION",
            BillingError::Rejected(rejection) => rejection.code.as_str(),
            BillingError::ProcessingChange(_) => "PROCESSING_CHANGE",
            BillingError::DowngradeLimitsExceeded(_) => "DOWNGRADE_LIMITS_EXCEEDED",
            BillingError::InvalidState(_) => "INVALID_STATE_TRANSITION",
            BillingError::Gateway {
                failure: GatewayFailure::Misconfigured,
                ..
            } => "BILLING_MISCONFIGURED",
            BillingError::Gateway { .. } => "GATEWAY_ERROR",
            BillingError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show the user. Never includes processor or internal ids.
    pub fn message(&self) -> String {
        match self {
            BillingError::InvalidPlan(plan) => format!("'{}' is not a valid plan", plan),
            BillingError::InvalidInterval(interval) => {
                format!("'{}' is not a valid billing interval", interval)
            }
            BillingError::InvalidRequest(reason) => reason.clone(),
            BillingError::UserNotFound(_) => "User account not found".to_string(),
            BillingError::NoActiveSubscription(_) => {
                "You do not have an active paid subscription".to_string()
            }
            BillingError::Rejected(rejection) => rejection.reason.clone(),
            BillingError::ProcessingChange(_) => {
                "A plan change is already in progress. Please try again shortly.".to_string()
            }
            BillingError::DowngradeLimitsExceeded(violations) => format!(
                "Your current usage exceeds the target plan's limits ({} issue{})",
                violations.len(),
                if violations.len() == 1 { "" } else { "s" }
            ),
            BillingError::InvalidState(_) => {
                "The subscription changed while the request was processed. Please reload and try again."
                    .to_string()
            }
            BillingError::Gateway {
                failure: GatewayFailure::Misconfigured,
                ..
            } => "Billing is temporarily unavailable. Our team has been notified.".to_string(),
            BillingError::Gateway { .. } => {
                "The payment provider could not complete the request. Please try again.".to_string()
            }
            BillingError::Infrastructure(_) => "An internal error occurred".to_string(),
        }
    }

    /// True for errors that describe a conflicting account state.
    pub fn is_conflict(&self) -> bool {
        match self {
            BillingError::ProcessingChange(_) | BillingError::InvalidState(_) => true,
            BillingError::Rejected(rejection) => rejection.code.is_conflict(),
            _ => false,
        }
    }

    /// True when the same request may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProcessingChange(_)
                | BillingError::Infrastructure(_)
                | BillingError::Gateway {
                    failure: GatewayFailure::Unavailable | GatewayFailure::Rejected,
                    ..
                }
        )
    }

    /// Rejection code when this error came from the transition validator.
    pub fn rejection_code(&self) -> Option<RejectionCode> {
        match self {
            BillingError::Rejected(rejection) => Some(rejection.code),
            _ => None,
        }
    }
}

impl From<TransitionRejection> for BillingError {
    fn from(rejection: TransitionRejection) -> Self {
        BillingError::Rejected(rejection)
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::InvalidStateTransition => BillingError::InvalidState(err.message),
            ErrorCode::ValidationFailed => BillingError::InvalidRequest(err.message),
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::UnknownValue { field, value } if field == "plan" => {
                BillingError::InvalidPlan(value.clone())
            }
            ValidationError::UnknownValue { field, value } if field == "interval" => {
                BillingError::InvalidInterval(value.clone())
            }
            _ => BillingError::InvalidRequest(err.to_string()),
        }
    }
}
