//! Stripe billing gateway adapter.
//!
//! Implements the `BillingGateway` port for Stripe, including:
//! - Checkout sessions for new subscriptions
//! - Subscription retrieval, price changes and cancellation
//! - Customer retrieval
//! - Error classification (configuration, mode mismatch, not found, processor, network)
//!
//! # Security
//!
//! - The API key is held in a `secrecy::SecretString`
//! - Webhook signatures are verified in the domain (`StripeWebhookVerifier`)

mod api_types;
mod mock_gateway;
mod stripe_gateway;

pub use api_types::{StripeApiError, StripeCheckoutSession, StripeCustomer, StripeErrorEnvelope};
pub use mock_gateway::{MethodCall, MockBillingGateway, ModificationGate};
pub use stripe_gateway::{StripeBillingGateway, StripeConfig};
