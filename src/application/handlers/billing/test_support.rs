//! Wiring shared by the billing handler tests.

use std::sync::Arc;

use super::{BillingContext, EffectDispatcher};
use crate::adapters::memory::{
    InMemoryBillingRecordRepository, InMemoryCollaborators, InMemorySubscriptionRepository,
    InMemoryUserDirectory, InMemoryWebhookEventRepository, RecordingNotifier,
};
use crate::adapters::stripe::MockBillingGateway;
use crate::domain::billing::test_support::active_record;
use crate::domain::billing::{BillingInterval, PlanCatalog, PlanId, SubscriptionRecord};
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};
use crate::ports::{ExternalSubscription, SubscriptionRepository};

pub fn test_catalog() -> PlanCatalog {
    PlanCatalog::standard()
        .with_price_ref(PlanId::Plus, BillingInterval::Monthly, "price_plus_monthly")
        .with_price_ref(PlanId::Plus, BillingInterval::Annual, "price_plus_annual")
        .with_price_ref(PlanId::Pro, BillingInterval::Monthly, "price_pro_monthly")
        .with_price_ref(PlanId::Pro, BillingInterval::Annual, "price_pro_annual")
}

pub struct Harness {
    pub users: Arc<InMemoryUserDirectory>,
    pub subscriptions: Arc<InMemorySubscriptionRepository>,
    pub billing_records: Arc<InMemoryBillingRecordRepository>,
    pub webhook_events: Arc<InMemoryWebhookEventRepository>,
    pub collaborators: Arc<InMemoryCollaborators>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: MockBillingGateway,
    pub ctx: BillingContext,
}

impl Harness {
    pub fn new() -> Self {
        let users = Arc::new(InMemoryUserDirectory::new());
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let collaborators = Arc::new(InMemoryCollaborators::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = MockBillingGateway::new();

        let ctx = BillingContext {
            users: users.clone(),
            subscriptions: subscriptions.clone(),
            gateway: Arc::new(gateway.clone()),
            usage: collaborators.clone(),
            galleries: collaborators.clone(),
            refunds: collaborators.clone(),
            catalog: Arc::new(test_catalog()),
            effects: Arc::new(EffectDispatcher::new(
                notifier.clone(),
                notifier.clone(),
                collaborators.clone(),
            )),
        };

        Self {
            users,
            subscriptions,
            billing_records: Arc::new(InMemoryBillingRecordRepository::new()),
            webhook_events: Arc::new(InMemoryWebhookEventRepository::new()),
            collaborators,
            notifier,
            gateway,
            ctx,
        }
    }

    /// Registers a user without a subscription.
    pub fn user(&self, id: &str, plan: PlanId) -> UserId {
        let user_id = UserId::new(id).unwrap();
        self.users
            .add_user(&user_id, format!("{}@example.com", id), plan);
        user_id
    }

    /// Registers a user with an active monthly subscription on `plan`.
    pub async fn subscribed(&self, id: &str, plan: PlanId) -> SubscriptionRecord {
        self.user(id, plan);
        let record = active_record(id, plan);
        self.subscriptions.insert(&record).await.unwrap();
        self.gateway.add_subscription(ExternalSubscription {
            id: record.external_subscription_ref.clone(),
            customer_ref: record.external_customer_ref.clone(),
            status: "active".to_string(),
            cancel_at_period_end: false,
            current_period_end: Some(Timestamp::now().add_days(20).as_unix_secs()),
            price_ref: Some(format!("price_{}_monthly", plan)),
            item_ref: Some("si_1".to_string()),
        });
        record
    }

    pub async fn record(&self, id: &SubscriptionId) -> SubscriptionRecord {
        self.subscriptions.find_by_id(id).await.unwrap().unwrap()
    }

    pub fn plan_of(&self, user_id: &UserId) -> PlanId {
        self.users.plan_of(user_id).unwrap()
    }
}
