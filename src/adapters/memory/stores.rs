//! In-memory implementations of the storage ports.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::domain::billing::{BillingRecord, PlanId, SubscriptionRecord};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, UserId};
use crate::ports::{
    BillingRecordRepository, ProcessedWebhookEvent, SaveResult, SubscriptionRepository,
    UserAccount, UserDirectory, WebhookEventRepository,
};

// ════════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription records in insertion order.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    records: Mutex<Vec<SubscriptionRecord>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, oldest first.
    pub fn all(&self) -> Vec<SubscriptionRecord> {
        lock(&self.records).clone()
    }

    fn find_last(&self, pred: impl Fn(&SubscriptionRecord) -> bool) -> Option<SubscriptionRecord> {
        lock(&self.records).iter().rev().find(|r| pred(r)).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        let mut records = lock(&self.records);
        if records
            .iter()
            .any(|r| r.external_subscription_ref == record.external_subscription_ref)
        {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                "External subscription is already recorded",
            ));
        }
        let mut stored = record.clone();
        stored.processing_change = false;
        records.push(stored);
        Ok(())
    }

    async fn update(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        let mut records = lock(&self.records);
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, "Subscription not found")
            })?;
        let lock_flag = stored.processing_change;
        *stored = record.clone();
        stored.processing_change = lock_flag;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.find_last(|r| r.id == *id))
    }

    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.find_last(|r| r.user_id == *user_id))
    }

    async fn find_by_external_ref(
        &self,
        external_subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.find_last(|r| r.external_subscription_ref == external_subscription_ref))
    }

    async fn find_latest_by_customer(
        &self,
        external_customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.find_last(|r| r.external_customer_ref == external_customer_ref))
    }

    async fn try_acquire_change_lock(&self, id: &SubscriptionId) -> Result<bool, DomainError> {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == *id) {
            Some(record) if !record.processing_change => {
                record.processing_change = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                "Subscription not found",
            )),
        }
    }

    async fn release_change_lock(&self, id: &SubscriptionId) -> Result<(), DomainError> {
        if let Some(record) = lock(&self.records).iter_mut().find(|r| r.id == *id) {
            record.processing_change = false;
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Billing records
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemoryBillingRecordRepository {
    records: Mutex<Vec<BillingRecord>>,
}

impl InMemoryBillingRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<BillingRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl BillingRecordRepository for InMemoryBillingRecordRepository {
    async fn exists_for_invoice(&self, external_invoice_ref: &str) -> Result<bool, DomainError> {
        Ok(lock(&self.records)
            .iter()
            .any(|r| r.external_invoice_ref == external_invoice_ref))
    }

    async fn insert(&self, record: &BillingRecord) -> Result<SaveResult, DomainError> {
        let mut records = lock(&self.records);
        if records
            .iter()
            .any(|r| r.external_invoice_ref == record.external_invoice_ref)
        {
            return Ok(SaveResult::AlreadyExists);
        }
        records.push(record.clone());
        Ok(SaveResult::Inserted)
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<BillingRecord>, DomainError> {
        Ok(lock(&self.records)
            .iter()
            .rev()
            .filter(|r| r.user_id == *user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook events
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    events: Mutex<HashMap<String, ProcessedWebhookEvent>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<ProcessedWebhookEvent>, DomainError> {
        Ok(lock(&self.events).get(event_id).cloned())
    }

    async fn save(&self, record: &ProcessedWebhookEvent) -> Result<SaveResult, DomainError> {
        let mut events = lock(&self.events);
        if events.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        events.insert(record.event_id.clone(), record.clone());
        Ok(SaveResult::Inserted)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Users
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<UserId, UserAccount>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, id: &UserId, email: impl Into<String>, plan: PlanId) {
        lock(&self.users).insert(
            id.clone(),
            UserAccount {
                id: id.clone(),
                email: email.into(),
                plan,
            },
        );
    }

    pub fn plan_of(&self, id: &UserId) -> Option<PlanId> {
        lock(&self.users).get(id).map(|u| u.plan)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        Ok(lock(&self.users).get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, DomainError> {
        Ok(lock(&self.users)
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn set_plan(&self, id: &UserId, plan: PlanId) -> Result<(), DomainError> {
        let mut users = lock(&self.users);
        let user = users.get_mut(id).ok_or_else(|| {
            DomainError::new(ErrorCode::UserNotFound, "User not found")
                .with_detail("user_id", id.as_str())
        })?;
        user.plan = plan;
        Ok(())
    }
}
