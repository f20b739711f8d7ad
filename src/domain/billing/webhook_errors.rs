//! Webhook error types for Stripe webhook handling.
//!
//! Verification failures reject the delivery outright. Everything else is a
//! processing failure: it is logged and the delivery is still acknowledged.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur during webhook ingestion and reconciliation.
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// No webhook signing secret is configured.
    #[error("Webhook secret not configured")]
    MissingSecret,

    /// The delivery carried no signature header.
    #[error("Missing signature header")]
    MissingSignature,

    /// The delivery carried no body.
    #[error("Empty payload")]
    EmptyPayload,

    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the replay window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from webhook payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The event's data object does not have the shape its type promises.
    #[error("Malformed event object: {0}")]
    MalformedObject(String),

    /// Payload referenced something we cannot map (plan, user, subscription).
    #[error("Unresolved reference: {0}")]
    Unresolved(String),

    /// Local state refused the change.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Payment gateway call made while reconciling failed.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// True when the delivery must be refused without touching any state.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSecret
                | WebhookError::MissingSignature
                | WebhookError::EmptyPayload
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
                | WebhookError::ParseError(_)
        )
    }

    /// HTTP status returned to the sender.
    ///
    /// Processing failures are acknowledged with 200 so the sender does not
    /// retry forever on a downstream bug.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::InvalidSignature | WebhookError::TimestampOutOfRange => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::MissingSignature
            | WebhookError::EmptyPayload
            | WebhookError::InvalidTimestamp
            | WebhookError::ParseError(_) => StatusCode::BAD_REQUEST,
            WebhookError::MissingField(_)
            | WebhookError::MalformedObject(_)
            | WebhookError::Unresolved(_)
            | WebhookError::InvalidTransition(_)
            | WebhookError::Gateway(_)
            | WebhookError::Database(_) => StatusCode::OK,
        }
    }

    /// Stable code for the rejection response body.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingSecret => "WEBHOOK_NOT_CONFIGURED",
            WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange
            | WebhookError::MissingSignature
            | WebhookError::InvalidTimestamp => "INVALID_WEBHOOK_SIGNATURE",
            WebhookError::EmptyPayload | WebhookError::ParseError(_) => "INVALID_WEBHOOK_PAYLOAD",
            _ => "WEBHOOK_PROCESSING_FAILED",
        }
    }
}

impl From<crate::domain::foundation::DomainError> for WebhookError {
    fn from(err: crate::domain::foundation::DomainError) -> Self {
        use crate::domain::foundation::ErrorCode;
        match err.code {
            ErrorCode::InvalidStateTransition => WebhookError::InvalidTransition(err.message),
            _ => WebhookError::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failures_are_not_acknowledged() {
        for err in [
            WebhookError::MissingSecret,
            WebhookError::MissingSignature,
            WebhookError::EmptyPayload,
            WebhookError::InvalidSignature,
            WebhookError::TimestampOutOfRange,
        ] {
            assert!(err.is_verification_failure());
            assert_ne!(err.status_code(), StatusCode::OK, "{:?}", err);
        }
    }

    #[test]
    fn processing_failures_are_acknowledged() {
        for err in [
            WebhookError::Database("connection reset".to_string()),
            WebhookError::Unresolved("user for customer".to_string()),
            WebhookError::MissingField("subscription"),
        ] {
            assert!(!err.is_verification_failure());
            assert_eq!(err.status_code(), StatusCode::OK);
        }
    }

    #[test]
    fn invalid_signature_is_unauthorized() {
        let err = WebhookError::InvalidSignature;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "INVALID_WEBHOOK_SIGNATURE");
        assert_eq!(format!("{}", err), "Invalid signature");
    }

    #[test]
    fn missing_secret_is_server_error() {
        assert_eq!(
            WebhookError::MissingSecret.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_field_displays_field_name() {
        let err = WebhookError::MissingField("subscription");
        assert_eq!(format!("{}", err), "Missing field: subscription");
    }
}
