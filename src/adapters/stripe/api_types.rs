//! Stripe REST response types.
//!
//! Subscription responses share their shape with webhook payloads and are parsed
//! into `SubscriptionObject`; the types here cover the remaining responses.

use serde::{Deserialize, Serialize};

use crate::domain::billing::SubscriptionObject;
use crate::ports::ExternalSubscription;

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Object Types
// ════════════════════════════════════════════════════════════════════════════════

/// Response of `POST /v1/checkout/sessions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCheckoutSession {
    /// Unique session identifier (cs_...).
    pub id: String,

    /// Hosted checkout page. Absent once the session is complete or expired.
    pub url: Option<String>,
}

/// Stripe Customer object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCustomer {
    /// Unique customer identifier (cus_...).
    pub id: String,

    pub email: Option<String>,

    /// Whether the customer has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

/// Body of a failed Stripe request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeApiError {
    /// `api_error`, `card_error`, `idempotency_error`, `invalid_request_error`.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,

    /// Short code such as `resource_missing`.
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

impl From<SubscriptionObject> for ExternalSubscription {
    fn from(sub: SubscriptionObject) -> Self {
        let item_ref = sub.items.data.first().and_then(|item| item.id.clone());
        let price_ref = sub.price_ref().map(str::to_string);
        let current_period_end = sub.period_end();
        ExternalSubscription {
            id: sub.id,
            customer_ref: sub.customer,
            status: sub.status,
            cancel_at_period_end: sub.cancel_at_period_end,
            current_period_end,
            price_ref,
            item_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_envelope() {
        let json = r#"{
            "error": {
                "code": "resource_missing",
                "doc_url": "https://stripe.com/docs/error-codes/resource-missing",
                "message": "No such subscription: 'sub_123'",
                "param": "id",
                "type": "invalid_request_error"
            }
        }"#;

        let envelope: StripeErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.error.code.as_deref(), Some("resource_missing"));
        assert_eq!(envelope.error.error_type.as_deref(), Some("invalid_request_error"));
    }

    #[test]
    fn subscription_object_converts_to_external_subscription() {
        let json = r#"{
            "id": "sub_test_123",
            "object": "subscription",
            "customer": "cus_test_xyz",
            "status": "active",
            "current_period_start": 1704067200,
            "current_period_end": 1706745600,
            "cancel_at_period_end": true,
            "items": {
                "object": "list",
                "data": [
                    { "id": "si_1", "price": { "id": "price_plus_monthly" }, "quantity": 1 }
                ]
            }
        }"#;

        let sub: SubscriptionObject = serde_json::from_str(json).unwrap();
        let external: ExternalSubscription = sub.into();

        assert_eq!(external.id, "sub_test_123");
        assert_eq!(external.customer_ref, "cus_test_xyz");
        assert_eq!(external.item_ref.as_deref(), Some("si_1"));
        assert_eq!(external.price_ref.as_deref(), Some("price_plus_monthly"));
        assert_eq!(external.current_period_end, Some(1706745600));
        assert!(external.cancel_at_period_end);
    }

    #[test]
    fn deleted_customer_parses() {
        let customer: StripeCustomer =
            serde_json::from_str(r#"{"id":"cus_1","deleted":true}"#).unwrap();
        assert!(customer.deleted);
        assert!(customer.email.is_none());
    }
}
