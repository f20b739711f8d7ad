//! Payment configuration

use std::time::Duration;

use serde::Deserialize;

use super::error::ValidationError;
use crate::adapters::stripe::StripeConfig;
use crate::domain::billing::{BillingInterval, PlanCatalog, PlanId};

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,

    /// Override for the Stripe API host (stripe-mock, proxies)
    pub stripe_api_base_url: Option<String>,

    /// Stripe request timeout in seconds
    #[serde(default = "default_stripe_timeout")]
    pub stripe_timeout_secs: u64,

    /// Refuse to start with a test key and ignore test-mode webhooks
    #[serde(default)]
    pub require_livemode: bool,

    /// Processor price ids per paid plan and interval
    #[serde(default)]
    pub prices: PriceIds,
}

/// Stripe price ids. A missing id disables checkout for that combination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceIds {
    pub plus_monthly: Option<String>,
    pub plus_annual: Option<String>,
    pub pro_monthly: Option<String>,
    pub pro_annual: Option<String>,
}

impl PriceIds {
    fn entries(&self) -> [(PlanId, BillingInterval, Option<&str>); 4] {
        [
            (PlanId::Plus, BillingInterval::Monthly, self.plus_monthly.as_deref()),
            (PlanId::Plus, BillingInterval::Annual, self.plus_annual.as_deref()),
            (PlanId::Pro, BillingInterval::Monthly, self.pro_monthly.as_deref()),
            (PlanId::Pro, BillingInterval::Annual, self.pro_annual.as_deref()),
        ]
    }
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_") || self.stripe_api_key.starts_with("rk_test_")
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_") || self.stripe_api_key.starts_with("rk_live_")
    }

    /// Livemode that inbound webhook events must carry, if enforced.
    pub fn expected_livemode(&self) -> Option<bool> {
        self.require_livemode.then_some(true)
    }

    /// Standard catalog with the configured price ids attached.
    pub fn catalog(&self) -> PlanCatalog {
        self.prices
            .entries()
            .into_iter()
            .fold(PlanCatalog::standard(), |catalog, (plan, interval, price)| {
                match price.map(str::trim).filter(|p| !p.is_empty()) {
                    Some(price) => catalog.with_price_ref(plan, interval, price),
                    None => catalog,
                }
            })
    }

    /// Plan/interval combinations without a price id, as `plan_interval` names.
    pub fn missing_prices(&self) -> Vec<String> {
        self.prices
            .entries()
            .into_iter()
            .filter(|(_, _, price)| price.map_or(true, |p| p.trim().is_empty()))
            .map(|(plan, interval, _)| format!("{}_{}", plan.as_str(), interval.as_str()))
            .collect()
    }

    /// Gateway settings derived from this configuration.
    pub fn stripe_config(&self) -> StripeConfig {
        let config = StripeConfig::new(self.stripe_api_key.clone())
            .with_timeout(Duration::from_secs(self.stripe_timeout_secs));
        match &self.stripe_api_base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        }
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired(
                "GALLERY_BILLING__PAYMENT__STRIPE_API_KEY",
            ));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired(
                "GALLERY_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET",
            ));
        }

        // Verify key prefixes for safety
        if !self.is_test_mode() && !self.is_live_mode() {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        if self.require_livemode && !self.is_live_mode() {
            return Err(ValidationError::LiveKeyRequired);
        }

        Ok(())
    }
}

fn default_stripe_timeout() -> u64 {
    20
}
