//! Stripe webhook event types.
//!
//! Defines the structures for parsing Stripe webhook payloads.
//! Only fields relevant to subscription reconciliation are captured.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Stripe webhook event (simplified).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    pub created: i64,

    /// Object containing event-specific data.
    pub data: StripeEventData,

    /// Whether this is a live mode event (vs test mode).
    #[serde(default)]
    pub livemode: bool,

    /// API version used to render this event. Null for some account events.
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object that triggered the event (polymorphic based on event type).
    pub object: serde_json::Value,

    /// Previous values for updated attributes (only for update events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Attempts to deserialize the data object as the specified type.
    pub fn deserialize_object<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }

    /// Parse the event type into a known enum variant.
    pub fn parsed_type(&self) -> StripeEventType {
        StripeEventType::parse(&self.event_type)
    }
}

/// Stripe event types the reconciler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeEventType {
    /// Checkout session completed successfully.
    CheckoutSessionCompleted,
    /// Customer subscription was updated.
    CustomerSubscriptionUpdated,
    /// Customer subscription was deleted.
    CustomerSubscriptionDeleted,
    /// Invoice was paid.
    InvoicePaid,
    /// Anything else. Acknowledged and ignored.
    Unknown,
}

impl StripeEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.updated" => Self::CustomerSubscriptionUpdated,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            "invoice.paid" => Self::InvoicePaid,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::CustomerSubscriptionUpdated => "customer.subscription.updated",
            Self::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaid => "invoice.paid",
            Self::Unknown => "unknown",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Event payload objects
// ════════════════════════════════════════════════════════════════════════════════

/// `data.object` of `checkout.session.completed`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

impl CheckoutSessionObject {
    /// User id stamped on the session when checkout was created.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .get("user_id")
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn plan(&self) -> Option<&str> {
        self.metadata.get("plan").map(String::as_str)
    }

    pub fn interval(&self) -> Option<&str> {
        self.metadata.get("interval").map(String::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

/// `data.object` of `customer.subscription.*`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: ItemList,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub price: Option<PriceObject>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceObject {
    pub id: String,
}

impl SubscriptionObject {
    /// Price reference of the first subscription item.
    pub fn price_ref(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    /// Period end, falling back to the item level field newer API versions use.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_end))
    }
}

/// `data.object` of `invoice.paid`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub lines: InvoiceLines,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub price: Option<PriceObject>,
}

impl InvoiceObject {
    pub fn price_ref(&self) -> Option<&str> {
        self.lines
            .data
            .iter()
            .find_map(|line| line.price.as_ref())
            .map(|price| price.id.as_str())
    }
}

/// Builder for creating test StripeEvent instances.
#[cfg(test)]
pub struct StripeEventBuilder {
    id: String,
    event_type: String,
    created: i64,
    object: serde_json::Value,
    livemode: bool,
}

#[cfg(test)]
impl Default for StripeEventBuilder {
    fn default() -> Self {
        Self {
            id: "evt_test_123".to_string(),
            event_type: "checkout.session.completed".to_string(),
            created: chrono::Utc::now().timestamp(),
            object: serde_json::json!({}),
            livemode: false,
        }
    }
}

#[cfg(test)]
impl StripeEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    pub fn object(mut self, object: serde_json::Value) -> Self {
        self.object = object;
        self
    }

    pub fn livemode(mut self, livemode: bool) -> Self {
        self.livemode = livemode;
        self
    }

    pub fn build(self) -> StripeEvent {
        StripeEvent {
            id: self.id,
            event_type: self.event_type,
            created: self.created,
            data: StripeEventData {
                object: self.object,
                previous_attributes: None,
            },
            livemode: self.livemode,
            api_version: Some("2023-10-16".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trips_known_names() {
        for t in [
            StripeEventType::CheckoutSessionCompleted,
            StripeEventType::CustomerSubscriptionUpdated,
            StripeEventType::CustomerSubscriptionDeleted,
            StripeEventType::InvoicePaid,
        ] {
            assert_eq!(StripeEventType::parse(t.as_str()), t);
        }
        assert_eq!(
            StripeEventType::parse("invoice.payment_failed"),
            StripeEventType::Unknown
        );
    }

    #[test]
    fn event_with_null_api_version_parses() {
        let raw = json!({
            "id": "evt_1",
            "type": "invoice.paid",
            "created": 1_700_000_000,
            "data": { "object": {} },
            "livemode": true,
            "api_version": null
        });
        let event: StripeEvent = serde_json::from_value(raw).unwrap();
        assert!(event.api_version.is_none());
        assert!(event.livemode);
    }

    #[test]
    fn subscription_event_exposes_envelope_and_object() {
        let event = StripeEventBuilder::new()
            .id("evt_sub_9")
            .event_type("customer.subscription.updated")
            .created(1_700_000_123)
            .livemode(true)
            .object(json!({
                "id": "sub_9",
                "customer": "cus_9",
                "status": "active",
                "cancel_at_period_end": true,
                "current_period_end": 1_702_000_000
            }))
            .build();

        assert_eq!(event.id, "evt_sub_9");
        assert_eq!(event.parsed_type(), StripeEventType::CustomerSubscriptionUpdated);
        assert_eq!(event.created, 1_700_000_123);
        assert!(event.livemode);

        let sub: SubscriptionObject = event.deserialize_object().unwrap();
        assert_eq!(sub.id, "sub_9");
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.current_period_end, Some(1_702_000_000));
        assert!(sub.items.data.is_empty());
    }

    #[test]
    fn checkout_session_prefers_metadata_user_id() {
        let event = StripeEventBuilder::new()
            .object(json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "client_reference_id": "other",
                "customer_details": { "email": "a@example.com" },
                "metadata": { "user_id": "user-1", "plan": "pro", "interval": "annual" }
            }))
            .build();
        let session: CheckoutSessionObject = event.deserialize_object().unwrap();

        assert_eq!(session.user_id(), Some("user-1"));
        assert_eq!(session.plan(), Some("pro"));
        assert_eq!(session.interval(), Some("annual"));
        assert_eq!(session.email(), Some("a@example.com"));
    }

    #[test]
    fn checkout_session_falls_back_to_client_reference() {
        let session: CheckoutSessionObject = serde_json::from_value(json!({
            "id": "cs_1",
            "client_reference_id": "user-2",
            "customer_email": "b@example.com"
        }))
        .unwrap();
        assert_eq!(session.user_id(), Some("user-2"));
        assert_eq!(session.email(), Some("b@example.com"));
    }

    #[test]
    fn subscription_object_reads_first_item_price() {
        let sub: SubscriptionObject = serde_json::from_value(json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "items": { "data": [
                { "id": "si_1", "price": { "id": "price_pro_m" }, "current_period_end": 1_800_000_000 }
            ]}
        }))
        .unwrap();
        assert_eq!(sub.price_ref(), Some("price_pro_m"));
        assert_eq!(sub.period_end(), Some(1_800_000_000));
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn invoice_object_defaults() {
        let invoice: InvoiceObject = serde_json::from_value(json!({
            "id": "in_1",
            "amount_paid": 1200,
            "lines": { "data": [ { "price": null }, { "price": { "id": "price_plus_m" } } ] }
        }))
        .unwrap();
        assert_eq!(invoice.currency, "usd");
        assert_eq!(invoice.price_ref(), Some("price_plus_m"));
    }
}
