//! Mock billing gateway for testing.
//!
//! Provides a configurable mock implementation of `BillingGateway` for unit
//! and integration tests. Supports:
//! - Processor-side subscriptions and customers kept in memory
//! - Error injection per method
//! - Call tracking
//! - Holding `modify_subscription` open to exercise the change lock

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::ports::{
    BillingGateway, CheckoutRequest, CheckoutSession, ExternalCustomer, ExternalSubscription,
    GatewayError, SubscriptionModification,
};

/// Default billing period used for subscriptions the mock has not been told about.
const DEFAULT_PERIOD_SECS: i64 = 30 * 24 * 60 * 60;

/// Mock billing gateway for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockBillingGateway::new();
///
/// // Inject errors
/// mock.set_method_error("modify_subscription", GatewayError::network("timeout"));
///
/// // Assert on calls
/// assert_eq!(mock.call_count("modify_subscription"), 0);
/// ```
#[derive(Default, Clone)]
pub struct MockBillingGateway {
    /// Inner state (thread-safe for async tests).
    inner: Arc<Mutex<MockState>>,
}

/// Internal mutable state.
#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, ExternalSubscription>,
    customers: HashMap<String, ExternalCustomer>,

    /// Specific errors by method name.
    method_errors: HashMap<String, GatewayError>,

    /// Track method calls for assertions.
    call_log: Vec<MethodCall>,

    /// Modifications in call order.
    modifications: Vec<(String, SubscriptionModification)>,

    checkout_count: u32,
    gate: Option<ModificationGate>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

/// Holds `modify_subscription` calls until released.
#[derive(Clone, Default)]
pub struct ModificationGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ModificationGate {
    /// Waits until a modification call is blocked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one blocked modification call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl MockBillingGateway {
    /// Create a new mock gateway with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a subscription to the "processor".
    pub fn add_subscription(&self, subscription: ExternalSubscription) {
        let id = subscription.id.clone();
        self.state().subscriptions.insert(id, subscription);
    }

    /// Add a customer to the "processor".
    pub fn add_customer(&self, id: impl Into<String>, email: Option<&str>) {
        let id = id.into();
        self.state().customers.insert(
            id.clone(),
            ExternalCustomer {
                id,
                email: email.map(str::to_string),
            },
        );
    }

    /// Set an error for a specific method until cleared.
    pub fn set_method_error(&self, method: &str, error: GatewayError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    /// Clear all configured errors.
    pub fn clear_errors(&self) {
        self.state().method_errors.clear();
    }

    /// Blocks subsequent `modify_subscription` calls until the gate releases them.
    pub fn hold_modifications(&self) -> ModificationGate {
        let gate = ModificationGate::default();
        self.state().gate = Some(gate.clone());
        gate
    }

    /// Current processor-side view of a subscription.
    pub fn subscription(&self, id: &str) -> Option<ExternalSubscription> {
        self.state().subscriptions.get(id).cloned()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    /// Get all recorded method calls.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    /// Get count of calls to a method.
    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Modifications sent, with the subscription they targeted.
    pub fn modifications(&self) -> Vec<(String, SubscriptionModification)> {
        self.state().modifications.clone()
    }

    /// True when any recorded modification changed a price.
    pub fn price_changed(&self) -> bool {
        self.state()
            .modifications
            .iter()
            .any(|(_, m)| m.changes_price())
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        let mut state = self.state();
        state.call_log.clear();
        state.modifications.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn record_call(&self, method: &str, args: Vec<String>) {
        self.state().call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
    }

    fn check_error(&self, method: &str) -> Result<(), GatewayError> {
        match self.state().method_errors.get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl MockState {
    /// Returns the subscription, creating a plausible active one when unknown.
    fn subscription_entry(&mut self, id: &str) -> &mut ExternalSubscription {
        self.subscriptions
            .entry(id.to_string())
            .or_insert_with(|| ExternalSubscription {
                id: id.to_string(),
                customer_ref: format!("cus_for_{}", id),
                status: "active".to_string(),
                cancel_at_period_end: false,
                current_period_end: Some(chrono::Utc::now().timestamp() + DEFAULT_PERIOD_SECS),
                price_ref: None,
                item_ref: Some(format!("si_{}", id)),
            })
    }
}

#[async_trait]
impl BillingGateway for MockBillingGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        self.record_call(
            "create_checkout_session",
            vec![
                request.user_id.to_string(),
                request.plan.as_str().to_string(),
                request.interval.as_str().to_string(),
                request.price_ref.clone(),
            ],
        );
        self.check_error("create_checkout_session")?;

        let mut state = self.state();
        state.checkout_count += 1;
        let id = format!("cs_mock_{}", state.checkout_count);
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/c/pay/{}", id),
            id,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, GatewayError> {
        self.record_call("retrieve_subscription", vec![subscription_ref.to_string()]);
        self.check_error("retrieve_subscription")?;

        self.state()
            .subscriptions
            .get(subscription_ref)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Subscription"))
    }

    async fn modify_subscription(
        &self,
        subscription_ref: &str,
        modification: SubscriptionModification,
    ) -> Result<ExternalSubscription, GatewayError> {
        self.record_call(
            "modify_subscription",
            vec![
                subscription_ref.to_string(),
                modification.price_ref.clone().unwrap_or_default(),
            ],
        );

        let gate = self.state().gate.clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.check_error("modify_subscription")?;

        let mut state = self.state();
        state
            .modifications
            .push((subscription_ref.to_string(), modification.clone()));
        let sub = state.subscription_entry(subscription_ref);
        if let Some(price) = modification.price_ref {
            sub.price_ref = Some(price);
        }
        if let Some(cancel) = modification.cancel_at_period_end {
            sub.cancel_at_period_end = cancel;
        }
        Ok(sub.clone())
    }

    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        at_period_end: bool,
    ) -> Result<ExternalSubscription, GatewayError> {
        self.record_call(
            "cancel_subscription",
            vec![subscription_ref.to_string(), at_period_end.to_string()],
        );
        self.check_error("cancel_subscription")?;

        let mut state = self.state();
        let sub = state.subscription_entry(subscription_ref);
        if at_period_end {
            sub.cancel_at_period_end = true;
        } else {
            sub.status = "canceled".to_string();
        }
        Ok(sub.clone())
    }

    async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<ExternalCustomer, GatewayError> {
        self.record_call("retrieve_customer", vec![customer_ref.to_string()]);
        self.check_error("retrieve_customer")?;

        self.state()
            .customers
            .get(customer_ref)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Customer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{BillingInterval, PlanId};
    use crate::domain::foundation::UserId;
    use crate::ports::{GatewayErrorKind, ProrationMode};

    #[tokio::test]
    async fn checkout_sessions_get_unique_urls() {
        let mock = MockBillingGateway::new();
        let request = CheckoutRequest {
            user_id: UserId::new("user-1").unwrap(),
            email: None,
            customer_ref: None,
            price_ref: "price_plus".to_string(),
            plan: PlanId::Plus,
            interval: BillingInterval::Monthly,
            success_url: "https://app/ok".to_string(),
            cancel_url: "https://app/cancel".to_string(),
        };

        let first = mock.create_checkout_session(request.clone()).await.unwrap();
        let second = mock.create_checkout_session(request).await.unwrap();

        assert_ne!(first.url, second.url);
        assert_eq!(mock.call_count("create_checkout_session"), 2);
    }

    #[tokio::test]
    async fn modify_tracks_price_changes() {
        let mock = MockBillingGateway::new();

        mock.modify_subscription("sub_1", SubscriptionModification::resume())
            .await
            .unwrap();
        assert!(!mock.price_changed());

        let sub = mock
            .modify_subscription(
                "sub_1",
                SubscriptionModification::change_price("price_pro", ProrationMode::None),
            )
            .await
            .unwrap();
        assert!(mock.price_changed());
        assert_eq!(sub.price_ref.as_deref(), Some("price_pro"));
        assert!(sub.current_period_end.is_some());
    }

    #[tokio::test]
    async fn method_error_is_returned_until_cleared() {
        let mock = MockBillingGateway::new();
        mock.set_method_error("cancel_subscription", GatewayError::network("down"));

        let err = mock.cancel_subscription("sub_1", true).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Network);

        mock.clear_errors();
        let sub = mock.cancel_subscription("sub_1", true).await.unwrap();
        assert!(sub.cancel_at_period_end);
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let mock = MockBillingGateway::new();
        mock.add_customer("cus_1", Some("a@example.com"));

        assert_eq!(
            mock.retrieve_customer("cus_1").await.unwrap().email.as_deref(),
            Some("a@example.com")
        );
        assert_eq!(
            mock.retrieve_customer("cus_2").await.unwrap_err().kind,
            GatewayErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn gate_holds_modification_until_released() {
        let mock = MockBillingGateway::new();
        let gate = mock.hold_modifications();

        let task = {
            let mock = mock.clone();
            tokio::spawn(async move {
                mock.modify_subscription("sub_1", SubscriptionModification::resume())
                    .await
            })
        };

        gate.entered().await;
        assert!(mock.modifications().is_empty());

        gate.release();
        task.await.unwrap().unwrap();
        assert_eq!(mock.modifications().len(), 1);
    }
}
