//! Stripe billing gateway adapter.
//!
//! Implements the `BillingGateway` port against the Stripe REST API using
//! form-encoded requests with the secret key as basic auth user.
//!
//! Every failed response is classified here, once, into a `GatewayErrorKind`.
//! Test/live mode mix-ups are recognised from Stripe's message text and carry
//! an operator hint.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key);
//! let gateway = StripeBillingGateway::new(config);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::billing::SubscriptionObject;
use crate::ports::{
    BillingGateway, CheckoutRequest, CheckoutSession, ExternalCustomer, ExternalSubscription,
    GatewayError, GatewayErrorKind, SubscriptionModification,
};

use super::api_types::{StripeCheckoutSession, StripeCustomer, StripeErrorEnvelope};

/// Fragments Stripe uses when an object belongs to the other mode.
const MODE_MISMATCH_MARKERS: [&str; 4] = [
    "exists in test mode, but a live mode key",
    "exists in live mode, but a test mode key",
    "a similar object exists in test mode",
    "a similar object exists in live mode",
];

const MODE_MISMATCH_HINT: &str = "The Stripe API key and the configured price or subscription ids belong to \
     different modes. Use price ids created in the same mode (test or live) as the API key.";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    timeout: Duration,
}

impl StripeConfig {
    /// Create a new Stripe configuration.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True for live mode keys.
    pub fn is_live_key(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_live_") || key.starts_with("rk_live_")
    }
}

/// Stripe billing gateway.
pub struct StripeBillingGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeBillingGateway {
    /// Create a new Stripe gateway with the given configuration.
    pub fn new(config: StripeConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    /// Sends an authenticated request and decodes the JSON response.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(operation, error = %e, "Stripe request could not be sent");
                GatewayError::network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_error(status.as_u16(), &body);
            tracing::error!(
                operation,
                status = status.as_u16(),
                kind = %err.kind,
                code = ?err.code,
                "Stripe request failed"
            );
            return Err(err);
        }

        response.json::<T>().await.map_err(|e| {
            GatewayError::processor(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

#[async_trait]
impl BillingGateway for StripeBillingGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let params = checkout_params(&request);
        let session: StripeCheckoutSession = self
            .execute(
                "create_checkout_session",
                self.http_client.post(self.url("checkout/sessions")).form(&params),
            )
            .await?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::processor("Checkout session has no redirect url"))?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, GatewayError> {
        let sub: SubscriptionObject = self
            .execute(
                "retrieve_subscription",
                self.http_client
                    .get(self.url(&format!("subscriptions/{}", subscription_ref))),
            )
            .await?;
        Ok(sub.into())
    }

    async fn modify_subscription(
        &self,
        subscription_ref: &str,
        modification: SubscriptionModification,
    ) -> Result<ExternalSubscription, GatewayError> {
        // Swapping a price needs the id of the item being replaced.
        let item_ref = if modification.changes_price() {
            let current = self.retrieve_subscription(subscription_ref).await?;
            Some(current.item_ref.ok_or_else(|| {
                GatewayError::processor("Subscription has no items to modify")
            })?)
        } else {
            None
        };

        let params = modification_params(item_ref.as_deref(), &modification);
        let sub: SubscriptionObject = self
            .execute(
                "modify_subscription",
                self.http_client
                    .post(self.url(&format!("subscriptions/{}", subscription_ref)))
                    .form(&params),
            )
            .await?;
        Ok(sub.into())
    }

    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        at_period_end: bool,
    ) -> Result<ExternalSubscription, GatewayError> {
        let url = self.url(&format!("subscriptions/{}", subscription_ref));
        let request = if at_period_end {
            self.http_client
                .post(&url)
                .form(&[("cancel_at_period_end", "true")])
        } else {
            self.http_client.delete(&url)
        };

        let sub: SubscriptionObject = self.execute("cancel_subscription", request).await?;
        Ok(sub.into())
    }

    async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<ExternalCustomer, GatewayError> {
        let customer: StripeCustomer = self
            .execute(
                "retrieve_customer",
                self.http_client
                    .get(self.url(&format!("customers/{}", customer_ref))),
            )
            .await?;

        if customer.deleted {
            return Err(GatewayError::not_found("Customer"));
        }
        Ok(ExternalCustomer {
            id: customer.id,
            email: customer.email,
        })
    }
}

fn checkout_params(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "subscription".to_string()),
        ("line_items[0][price]".to_string(), request.price_ref.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), request.user_id.to_string()),
    ];

    for (key, value) in [
        ("user_id", request.user_id.to_string()),
        ("plan", request.plan.as_str().to_string()),
        ("interval", request.interval.as_str().to_string()),
    ] {
        params.push((format!("metadata[{}]", key), value.clone()));
        params.push((format!("subscription_data[metadata][{}]", key), value));
    }

    match (&request.customer_ref, &request.email) {
        (Some(customer), _) => params.push(("customer".to_string(), customer.clone())),
        (None, Some(email)) => params.push(("customer_email".to_string(), email.clone())),
        (None, None) => {}
    }
    params
}

fn modification_params(
    item_ref: Option<&str>,
    modification: &SubscriptionModification,
) -> Vec<(String, String)> {
    let mut params = Vec::new();

    if let (Some(item), Some(price)) = (item_ref, &modification.price_ref) {
        params.push(("items[0][id]".to_string(), item.to_string()));
        params.push(("items[0][price]".to_string(), price.clone()));
        params.push((
            "proration_behavior".to_string(),
            modification.proration.as_stripe().to_string(),
        ));
    }
    if let Some(cancel) = modification.cancel_at_period_end {
        params.push(("cancel_at_period_end".to_string(), cancel.to_string()));
    }

    let mut metadata: Vec<_> = modification.metadata.iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
    }
    params
}

/// Maps a failed Stripe response to a typed gateway error.
pub(crate) fn classify_error(status: u16, body: &str) -> GatewayError {
    let parsed = serde_json::from_str::<StripeErrorEnvelope>(body).ok();
    let (error_type, code, message) = match parsed {
        Some(envelope) => (
            envelope.error.error_type,
            envelope.error.code,
            envelope
                .error
                .message
                .unwrap_or_else(|| format!("Stripe returned HTTP {}", status)),
        ),
        None => (None, None, format!("Stripe returned HTTP {}", status)),
    };

    let lowered = message.to_lowercase();
    let kind = if MODE_MISMATCH_MARKERS.iter().any(|m| lowered.contains(m)) {
        GatewayErrorKind::ModeMismatch
    } else if matches!(status, 401 | 403)
        || matches!(
            error_type.as_deref(),
            Some("authentication_error") | Some("permission_error")
        )
    {
        GatewayErrorKind::Configuration
    } else if status == 404 || code.as_deref() == Some("resource_missing") {
        GatewayErrorKind::NotFound
    } else if status >= 500 {
        GatewayErrorKind::Network
    } else {
        GatewayErrorKind::Processor
    };

    let mut err = GatewayError::new(kind, message);
    if let Some(code) = code {
        err = err.with_code(code);
    }
    if kind == GatewayErrorKind::ModeMismatch {
        err = err.with_hint(MODE_MISMATCH_HINT);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{BillingInterval, PlanId};
    use crate::domain::foundation::UserId;
    use crate::ports::ProrationMode;

    fn stripe_error(error_type: &str, code: &str, message: &str) -> String {
        serde_json::json!({
            "error": { "type": error_type, "code": code, "message": message }
        })
        .to_string()
    }

    fn checkout_request() -> CheckoutRequest {
        CheckoutRequest {
            user_id: UserId::new("user-1").unwrap(),
            email: Some("a@example.com".to_string()),
            customer_ref: None,
            price_ref: "price_pro_annual".to_string(),
            plan: PlanId::Pro,
            interval: BillingInterval::Annual,
            success_url: "https://app.example.com/billing?success=1".to_string(),
            cancel_url: "https://app.example.com/billing".to_string(),
        }
    }

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new("sk_test_key");
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert!(!config.is_live_key());
    }

    #[test]
    fn config_with_base_url() {
        let config = StripeConfig::new("key").with_base_url("http://localhost:12111");
        assert_eq!(config.api_base_url, "http://localhost:12111");
    }

    #[test]
    fn live_key_detected() {
        assert!(StripeConfig::new("sk_live_abc").is_live_key());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Error Classification Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn mode_mismatch_detected_from_message() {
        let body = stripe_error(
            "invalid_request_error",
            "resource_missing",
            "No such price: 'price_123'; a similar object exists in test mode, but a live mode key was used to make this request.",
        );

        let err = classify_error(400, &body);

        assert_eq!(err.kind, GatewayErrorKind::ModeMismatch);
        assert_eq!(err.code.as_deref(), Some("resource_missing"));
        assert!(err.hint.is_some());
    }

    #[test]
    fn authentication_failure_is_configuration() {
        let body = stripe_error("invalid_request_error", "", "Invalid API Key provided: sk_test_****");
        assert_eq!(classify_error(401, &body).kind, GatewayErrorKind::Configuration);
    }

    #[test]
    fn missing_resource_is_not_found() {
        let body = stripe_error(
            "invalid_request_error",
            "resource_missing",
            "No such subscription: 'sub_123'",
        );
        assert_eq!(classify_error(404, &body).kind, GatewayErrorKind::NotFound);
    }

    #[test]
    fn card_error_is_processor() {
        let body = stripe_error("card_error", "card_declined", "Your card was declined.");
        let err = classify_error(402, &body);
        assert_eq!(err.kind, GatewayErrorKind::Processor);
        assert!(err.is_retryable());
    }

    #[test]
    fn server_error_without_body_is_network() {
        let err = classify_error(503, "<html>down</html>");
        assert_eq!(err.kind, GatewayErrorKind::Network);
        assert!(err.code.is_none());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Request Parameter Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn checkout_params_carry_metadata() {
        let params = checkout_params(&checkout_request());

        assert_eq!(param(&params, "mode"), Some("subscription"));
        assert_eq!(param(&params, "line_items[0][price]"), Some("price_pro_annual"));
        assert_eq!(param(&params, "metadata[user_id]"), Some("user-1"));
        assert_eq!(param(&params, "metadata[plan]"), Some("pro"));
        assert_eq!(param(&params, "metadata[interval]"), Some("annual"));
        assert_eq!(
            param(&params, "subscription_data[metadata][plan]"),
            Some("pro")
        );
        assert_eq!(param(&params, "customer_email"), Some("a@example.com"));
    }

    #[test]
    fn checkout_params_prefer_existing_customer() {
        let mut request = checkout_request();
        request.customer_ref = Some("cus_1".to_string());

        let params = checkout_params(&request);

        assert_eq!(param(&params, "customer"), Some("cus_1"));
        assert!(param(&params, "customer_email").is_none());
    }

    #[test]
    fn price_change_params_replace_existing_item() {
        let modification =
            SubscriptionModification::change_price("price_plus", ProrationMode::ImmediateWithInvoice)
                .with_metadata("plan", "plus");

        let params = modification_params(Some("si_1"), &modification);

        assert_eq!(param(&params, "items[0][id]"), Some("si_1"));
        assert_eq!(param(&params, "items[0][price]"), Some("price_plus"));
        assert_eq!(param(&params, "proration_behavior"), Some("always_invoice"));
        assert_eq!(param(&params, "metadata[plan]"), Some("plus"));
        assert!(param(&params, "cancel_at_period_end").is_none());
    }

    #[test]
    fn resume_params_only_clear_cancel_flag() {
        let params = modification_params(None, &SubscriptionModification::resume());

        assert_eq!(params.len(), 1);
        assert_eq!(param(&params, "cancel_at_period_end"), Some("false"));
    }
}
