//! HandleBillingWebhookHandler - Command handler reconciling processor webhooks.
//!
//! Deliveries are verified before anything is read from them. A verified event
//! is deduplicated by id, then mapped onto the subscription store, the user's
//! effective plan and the billing ledger. Webhooks never take the change lock;
//! every mapping is an idempotent upsert driven by stored state.
//!
//! Only verification failures are returned as errors. A failure while applying
//! a verified event is logged and reported in the result, and the event is not
//! recorded as processed so the processor's redelivery gets another attempt.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::domain::billing::{
    AuditAction, AuditEntry, BillingEffect, BillingInterval, BillingRecord, CheckoutSessionObject,
    EmailKind, InvoiceObject, NewSubscription, PlanId, StripeEvent, StripeEventType,
    StripeWebhookVerifier, SubscriptionObject, SubscriptionRecord, WebhookError,
};
use crate::domain::foundation::{ErrorCode, Timestamp, UserId};
use crate::ports::{
    BillingRecordRepository, ProcessedWebhookEvent, SaveResult, UserAccount,
    WebhookEventRepository,
};

use super::BillingContext;

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleBillingWebhookCommand {
    pub payload: Vec<u8>,
    /// Value of the `Stripe-Signature` header.
    pub signature: Option<String>,
}

/// What happened to a verified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// State changed.
    Applied(String),
    /// Nothing to do.
    Ignored(String),
    /// The event id was processed before.
    Duplicate,
    /// Applying the event failed; it was not recorded as processed.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct HandleBillingWebhookResult {
    pub event_id: String,
    pub event_type: String,
    pub disposition: WebhookDisposition,
}

/// Reconciliation knobs.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// When set, events whose `livemode` differs are ignored.
    pub expected_livemode: Option<bool>,
    /// How early a scheduled downgrade may be applied.
    pub pending_change_tolerance_secs: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            expected_livemode: None,
            pending_change_tolerance_secs: 300,
        }
    }
}

struct Reconciled {
    applied: bool,
    note: String,
    effects: Vec<BillingEffect>,
}

impl Reconciled {
    fn applied(note: impl Into<String>, effects: Vec<BillingEffect>) -> Self {
        Self {
            applied: true,
            note: note.into(),
            effects,
        }
    }

    fn ignored(note: impl Into<String>) -> Self {
        Self {
            applied: false,
            note: note.into(),
            effects: Vec::new(),
        }
    }
}

pub struct HandleBillingWebhookHandler {
    verifier: StripeWebhookVerifier,
    webhook_events: Arc<dyn WebhookEventRepository>,
    billing_records: Arc<dyn BillingRecordRepository>,
    ctx: BillingContext,
    settings: ReconcilerSettings,
}

impl HandleBillingWebhookHandler {
    pub fn new(
        verifier: StripeWebhookVerifier,
        webhook_events: Arc<dyn WebhookEventRepository>,
        billing_records: Arc<dyn BillingRecordRepository>,
        ctx: BillingContext,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            verifier,
            webhook_events,
            billing_records,
            ctx,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleBillingWebhookCommand,
    ) -> Result<HandleBillingWebhookResult, WebhookError> {
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, cmd.signature.as_deref())
            .map_err(|err| {
                tracing::warn!(error = %err, "Rejected webhook delivery");
                err
            })?;

        let result = |disposition| HandleBillingWebhookResult {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            disposition,
        };

        match self.webhook_events.find_by_event_id(&event.id).await {
            Ok(Some(_)) => {
                tracing::debug!(event_id = %event.id, "Webhook event already processed");
                return Ok(result(WebhookDisposition::Duplicate));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %err,
                    "Webhook dedup lookup failed; processing anyway"
                );
            }
        }

        let outcome = match self.settings.expected_livemode {
            Some(expected) if expected != event.livemode => Ok(Reconciled::ignored(format!(
                "livemode={} event does not match the configured key",
                event.livemode
            ))),
            _ => self.reconcile(&event).await,
        };

        let disposition = match outcome {
            Ok(reconciled) => {
                self.ctx.effects.dispatch(&reconciled.effects).await;
                self.mark_processed(&event, &reconciled).await;
                if reconciled.applied {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        note = %reconciled.note,
                        "Webhook event applied"
                    );
                    WebhookDisposition::Applied(reconciled.note)
                } else {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        reason = %reconciled.note,
                        "Webhook event ignored"
                    );
                    WebhookDisposition::Ignored(reconciled.note)
                }
            }
            Err(err) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "Webhook event processing failed"
                );
                WebhookDisposition::Failed(err.to_string())
            }
        };

        Ok(result(disposition))
    }

    async fn reconcile(&self, event: &StripeEvent) -> Result<Reconciled, WebhookError> {
        match event.parsed_type() {
            StripeEventType::CheckoutSessionCompleted => self.checkout_completed(event).await,
            StripeEventType::CustomerSubscriptionUpdated => self.subscription_updated(event).await,
            StripeEventType::CustomerSubscriptionDeleted => self.subscription_deleted(event).await,
            StripeEventType::InvoicePaid => self.invoice_paid(event).await,
            StripeEventType::Unknown => Ok(Reconciled::ignored("unhandled event type")),
        }
    }

    async fn mark_processed(&self, event: &StripeEvent, reconciled: &Reconciled) {
        let record = if reconciled.applied {
            ProcessedWebhookEvent::success(&event.id, &event.event_type)
        } else {
            ProcessedWebhookEvent::ignored(&event.id, &event.event_type, &reconciled.note)
        };
        match self.webhook_events.save(&record).await {
            Ok(SaveResult::Inserted) => {}
            Ok(SaveResult::AlreadyExists) => {
                tracing::debug!(event_id = %event.id, "Concurrent delivery recorded the event first");
            }
            Err(err) => {
                tracing::warn!(event_id = %event.id, error = %err, "Failed to record processed event");
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout.session.completed
    // ════════════════════════════════════════════════════════════════════════════

    async fn checkout_completed(&self, event: &StripeEvent) -> Result<Reconciled, WebhookError> {
        let session: CheckoutSessionObject = object(event)?;
        let subscription_ref = session
            .subscription
            .clone()
            .ok_or(WebhookError::MissingField("subscription"))?;

        if self
            .ctx
            .subscriptions
            .find_by_external_ref(&subscription_ref)
            .await?
            .is_some()
        {
            return Ok(Reconciled::ignored("subscription already recorded"));
        }

        let user = self.checkout_user(&session).await?;
        let metadata_plan = session
            .plan()
            .and_then(|raw| PlanId::normalize(raw).ok())
            .filter(PlanId::is_paid);
        let metadata_interval = session
            .interval()
            .and_then(|raw| raw.parse::<BillingInterval>().ok());

        let (plan, interval, customer_ref) = match (metadata_plan, session.customer.clone()) {
            (Some(plan), Some(customer)) => (plan, metadata_interval.unwrap_or_default(), customer),
            _ => {
                let external = self
                    .ctx
                    .gateway
                    .retrieve_subscription(&subscription_ref)
                    .await
                    .map_err(|err| WebhookError::Gateway(err.to_string()))?;
                let priced = external
                    .price_ref
                    .as_deref()
                    .and_then(|price| self.ctx.catalog.plan_for_price_ref(price));
                let plan = metadata_plan
                    .or(priced.map(|(plan, _)| plan))
                    .ok_or_else(|| {
                        WebhookError::Unresolved(format!("plan of subscription {}", subscription_ref))
                    })?;
                let interval = metadata_interval
                    .or(priced.map(|(_, interval)| interval))
                    .unwrap_or_default();
                let customer = session.customer.clone().unwrap_or(external.customer_ref);
                (plan, interval, customer)
            }
        };

        let mut effects = Vec::new();

        // One live subscription per user: end the one being replaced first.
        let previous = self
            .ctx
            .subscriptions
            .find_latest_by_user(&user.id)
            .await?
            .filter(SubscriptionRecord::is_active);
        if let Some(mut old) = previous {
            if let Err(err) = self
                .ctx
                .gateway
                .cancel_subscription(&old.external_subscription_ref, false)
                .await
            {
                tracing::error!(
                    user_id = %user.id,
                    subscription_id = %old.id,
                    error = %err,
                    "Failed to cancel replaced subscription at the processor"
                );
            }
            let old_plan = old.plan;
            old.mark_canceled()?;
            self.ctx.subscriptions.update(&old).await?;
            tracing::info!(
                user_id = %user.id,
                subscription_id = %old.id,
                "Replaced subscription marked canceled"
            );
            effects.push(BillingEffect::audit(
                AuditEntry::new(user.id.clone(), AuditAction::SubscriptionReplaced)
                    .for_subscription(old.id)
                    .plans(Some(old_plan), Some(plan)),
            ));
        }

        let email = session.email().unwrap_or(&user.email).to_string();
        let record = SubscriptionRecord::activate(NewSubscription {
            user_id: user.id.clone(),
            external_subscription_ref: subscription_ref,
            external_customer_ref: customer_ref,
            user_email: email.clone(),
            plan,
            interval,
        });
        match self.ctx.subscriptions.insert(&record).await {
            Err(err) if err.code == ErrorCode::Conflict => {
                return Ok(Reconciled::ignored("subscription already recorded"));
            }
            other => other?,
        }
        self.ctx.users.set_plan(&user.id, plan).await?;

        effects.push(BillingEffect::audit(
            AuditEntry::new(user.id.clone(), AuditAction::SubscriptionStarted)
                .for_subscription(record.id)
                .plans(Some(user.plan), Some(plan)),
        ));
        effects.push(BillingEffect::email(
            email,
            user.id.clone(),
            EmailKind::SubscriptionStarted,
            plan,
            None,
        ));

        Ok(Reconciled::applied(
            format!("opened {} {} subscription", plan, interval),
            effects,
        ))
    }

    async fn checkout_user(
        &self,
        session: &CheckoutSessionObject,
    ) -> Result<UserAccount, WebhookError> {
        if let Some(raw) = session.user_id() {
            let id = UserId::new(raw).map_err(|e| WebhookError::Unresolved(e.to_string()))?;
            if let Some(user) = self.ctx.users.find_by_id(&id).await? {
                return Ok(user);
            }
        }
        if let Some(email) = session.email() {
            if let Some(user) = self.ctx.users.find_by_email(email).await? {
                return Ok(user);
            }
        }
        Err(WebhookError::Unresolved(format!(
            "user for checkout session {}",
            session.id
        )))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.updated
    // ════════════════════════════════════════════════════════════════════════════

    async fn subscription_updated(&self, event: &StripeEvent) -> Result<Reconciled, WebhookError> {
        let sub: SubscriptionObject = object(event)?;
        let Some(mut record) = self.ctx.subscriptions.find_by_external_ref(&sub.id).await? else {
            return Ok(Reconciled::ignored("unknown subscription"));
        };
        if !record.is_active() {
            return Ok(Reconciled::ignored("subscription record already canceled"));
        }

        let now = Timestamp::now();
        let from_plan = record.plan;
        let last_local_change = record.updated_at.as_unix_secs();
        let mut outcome = UpdateOutcome::default();

        // A due downgrade is decided from stored state alone.
        if let (Some(plan), Some(at)) = (record.pending_downgrade(), record.pending_plan_change_at) {
            if !at.is_after(&now.plus_secs(self.settings.pending_change_tolerance_secs)) {
                record.apply_pending_downgrade()?;
                outcome.plan_changed = true;
                outcome.changes.push(format!("applied scheduled downgrade to {}", plan));
                outcome
                    .effects
                    .push(audit(&record, AuditAction::DowngradeApplied, from_plan, plan));
            }
        }

        if event.created < last_local_change {
            tracing::warn!(
                event_id = %event.id,
                subscription_id = %record.id,
                "Subscription update predates the last local change"
            );
            if outcome.changes.is_empty() {
                return Ok(Reconciled::ignored("event predates the last local change"));
            }
        } else {
            self.mirror_processor_state(&sub, &mut record, now, &mut outcome)?;
        }

        if outcome.changes.is_empty() {
            return Ok(Reconciled::ignored("no changes"));
        }

        self.ctx.subscriptions.update(&record).await?;
        if outcome.plan_changed {
            self.ctx.users.set_plan(&record.user_id, record.plan).await?;
        }
        Ok(Reconciled::applied(outcome.changes.join("; "), outcome.effects))
    }

    /// Copies the cancel flag and billed plan of the processor's subscription
    /// onto the record.
    fn mirror_processor_state(
        &self,
        sub: &SubscriptionObject,
        record: &mut SubscriptionRecord,
        now: Timestamp,
        outcome: &mut UpdateOutcome,
    ) -> Result<(), WebhookError> {
        let from_plan = record.plan;
        let period_end = sub
            .period_end()
            .and_then(Timestamp::from_unix_secs)
            .unwrap_or_else(|| now.add_days(record.interval.days()));

        let event_plan = sub
            .price_ref()
            .and_then(|price| self.ctx.catalog.plan_for_price_ref(price))
            .map(|(plan, _)| plan)
            .or_else(|| {
                sub.metadata
                    .get("plan")
                    .and_then(|raw| PlanId::normalize(raw).ok())
            })
            .filter(PlanId::is_paid);

        if sub.cancel_at_period_end && !record.cancellation_in_flight() {
            record.schedule_cancellation(period_end)?;
            outcome.changes.push("cancellation scheduled at the processor".to_string());
            outcome.effects.push(audit(
                record,
                AuditAction::CancellationScheduled,
                from_plan,
                PlanId::Free,
            ));
        } else if !sub.cancel_at_period_end && record.cancel_at_period_end {
            record.reactivate()?;
            outcome.plan_changed = true;
            outcome.changes.push("cancellation withdrawn at the processor".to_string());
            outcome
                .effects
                .push(audit(record, AuditAction::Reactivated, from_plan, record.plan));

            // A lower price billed at reactivation is the downgrade that was
            // scheduled before the cancellation.
            if let Some(plan) = event_plan
                .filter(|plan| self.ctx.level(*plan) < self.ctx.level(record.plan))
            {
                record.schedule_downgrade(plan, period_end)?;
                outcome
                    .changes
                    .push(format!("scheduled downgrade to {} kept", plan));
            }
        }

        if let Some(plan) = event_plan {
            // The processor already bills the scheduled plan during a pending downgrade.
            if plan != record.plan
                && Some(plan) != record.pending_plan
                && !record.cancellation_in_flight()
            {
                record.replace_plan(plan)?;
                outcome.plan_changed = true;
                outcome
                    .changes
                    .push(format!("plan changed at the processor to {}", plan));
                outcome.effects.push(audit(
                    record,
                    AuditAction::PlanChangedAtProcessor,
                    from_plan,
                    plan,
                ));
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.deleted
    // ════════════════════════════════════════════════════════════════════════════

    async fn subscription_deleted(&self, event: &StripeEvent) -> Result<Reconciled, WebhookError> {
        let sub: SubscriptionObject = object(event)?;
        let Some(mut record) = self.ctx.subscriptions.find_by_external_ref(&sub.id).await? else {
            return Ok(Reconciled::ignored("unknown subscription"));
        };
        if !record.is_active() {
            return Ok(Reconciled::ignored("subscription record already canceled"));
        }

        let from_plan = record.plan;
        let fallback = record.mark_canceled()?;
        self.ctx.subscriptions.update(&record).await?;

        let is_current = self
            .ctx
            .subscriptions
            .find_latest_by_user(&record.user_id)
            .await?
            .is_some_and(|latest| latest.id == record.id);
        if is_current {
            self.ctx.users.set_plan(&record.user_id, fallback).await?;
        } else {
            tracing::info!(
                user_id = %record.user_id,
                subscription_id = %record.id,
                "Ended subscription was superseded; effective plan left alone"
            );
        }

        Ok(Reconciled::applied(
            format!("subscription ended, falling back to {}", fallback),
            vec![audit(&record, AuditAction::SubscriptionEnded, from_plan, fallback)],
        ))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice.paid
    // ════════════════════════════════════════════════════════════════════════════

    async fn invoice_paid(&self, event: &StripeEvent) -> Result<Reconciled, WebhookError> {
        let invoice: InvoiceObject = object(event)?;
        if self.billing_records.exists_for_invoice(&invoice.id).await? {
            return Ok(Reconciled::ignored("invoice already recorded"));
        }

        let (user_id, record_plan) = self.invoice_owner(&invoice).await?.ok_or_else(|| {
            tracing::warn!(
                invoice = %invoice.id,
                customer = ?invoice.customer,
                "Could not resolve the user an invoice belongs to"
            );
            WebhookError::Unresolved(format!("user for invoice {}", invoice.id))
        })?;

        let plan = invoice
            .price_ref()
            .and_then(|price| self.ctx.catalog.plan_for_price_ref(price))
            .map(|(plan, _)| plan)
            .or(record_plan);

        let record = BillingRecord::paid_invoice(
            user_id.clone(),
            invoice.id.clone(),
            invoice.amount_paid,
            invoice.currency.clone(),
            plan,
        );
        if self.billing_records.insert(&record).await? == SaveResult::AlreadyExists {
            return Ok(Reconciled::ignored("invoice already recorded"));
        }

        Ok(Reconciled::applied(
            format!("recorded invoice {}", invoice.id),
            vec![BillingEffect::audit(
                AuditEntry::new(user_id, AuditAction::InvoicePaid).plans(None, plan),
            )],
        ))
    }

    /// Customer ref in the store, then the processor's customer email, then
    /// the email printed on the invoice.
    async fn invoice_owner(
        &self,
        invoice: &InvoiceObject,
    ) -> Result<Option<(UserId, Option<PlanId>)>, WebhookError> {
        let mut emails = Vec::new();

        if let Some(customer) = invoice.customer.as_deref() {
            if let Some(record) = self.ctx.subscriptions.find_latest_by_customer(customer).await? {
                return Ok(Some((record.user_id, Some(record.plan))));
            }
            match self.ctx.gateway.retrieve_customer(customer).await {
                Ok(found) => emails.extend(found.email),
                Err(err) => {
                    tracing::warn!(
                        customer = %customer,
                        error = %err,
                        "Customer lookup failed while resolving invoice"
                    );
                }
            }
        }
        emails.extend(invoice.customer_email.clone());

        for email in emails {
            if let Some(user) = self.ctx.users.find_by_email(&email).await? {
                return Ok(Some((user.id, None)));
            }
        }
        Ok(None)
    }
}

/// Record changes collected while reconciling one subscription update.
#[derive(Default)]
struct UpdateOutcome {
    changes: Vec<String>,
    effects: Vec<BillingEffect>,
    plan_changed: bool,
}

fn object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T, WebhookError> {
    event
        .deserialize_object()
        .map_err(|e| WebhookError::MalformedObject(format!("{}: {}", event.event_type, e)))
}

fn audit(record: &SubscriptionRecord, action: AuditAction, from: PlanId, to: PlanId) -> BillingEffect {
    BillingEffect::audit(
        AuditEntry::new(record.user_id.clone(), action)
            .for_subscription(record.id)
            .plans(Some(from), Some(to)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::test_support::Harness;
    use crate::domain::billing::{signature_header, LifecycleState};
    use crate::ports::SubscriptionRepository;
    use serde_json::{json, Value};

    const SECRET: &str = "whsec_test_secret";

    fn handler(h: &Harness) -> HandleBillingWebhookHandler {
        handler_with(h, ReconcilerSettings::default())
    }

    fn handler_with(h: &Harness, settings: ReconcilerSettings) -> HandleBillingWebhookHandler {
        HandleBillingWebhookHandler::new(
            StripeWebhookVerifier::new(SECRET),
            h.webhook_events.clone(),
            h.billing_records.clone(),
            h.ctx.clone(),
            settings,
        )
    }

    fn event_at(id: &str, event_type: &str, created: i64, object: Value) -> Value {
        json!({
            "id": id,
            "object": "event",
            "type": event_type,
            "created": created,
            "livemode": false,
            "data": { "object": object }
        })
    }

    fn event(id: &str, event_type: &str, object: Value) -> Value {
        event_at(id, event_type, Timestamp::now().as_unix_secs(), object)
    }

    fn delivery(event: &Value) -> HandleBillingWebhookCommand {
        let payload = serde_json::to_vec(event).unwrap();
        let signature =
            signature_header(SECRET, Timestamp::now().as_unix_secs(), &payload).unwrap();
        HandleBillingWebhookCommand {
            payload,
            signature: Some(signature),
        }
    }

    fn checkout_session(user: &str, subscription: &str, plan: &str) -> Value {
        json!({
            "id": format!("cs_{}", subscription),
            "object": "checkout.session",
            "customer": format!("cus_{}", user),
            "subscription": subscription,
            "client_reference_id": user,
            "metadata": { "user_id": user, "plan": plan, "interval": "monthly" }
        })
    }

    fn subscription_object(record: &SubscriptionRecord, price: &str, cancel: bool) -> Value {
        json!({
            "id": record.external_subscription_ref,
            "object": "subscription",
            "customer": record.external_customer_ref,
            "status": "active",
            "cancel_at_period_end": cancel,
            "current_period_end": Timestamp::now().add_days(20).as_unix_secs(),
            "items": { "data": [ { "id": "si_1", "price": { "id": price } } ] }
        })
    }

    fn invoice(id: &str, customer: &str, email: Option<&str>) -> Value {
        json!({
            "id": id,
            "object": "invoice",
            "customer": customer,
            "customer_email": email,
            "amount_paid": 1900,
            "currency": "usd",
            "lines": { "data": [ { "price": { "id": "price_pro_monthly" } } ] }
        })
    }

    fn applied(result: &HandleBillingWebhookResult) -> bool {
        matches!(result.disposition, WebhookDisposition::Applied(_))
    }

    fn ignored(result: &HandleBillingWebhookResult) -> bool {
        matches!(result.disposition, WebhookDisposition::Ignored(_))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Verification
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn invalid_signature_changes_nothing() {
        let h = Harness::new();
        h.user("u1", PlanId::Free);
        let mut cmd = delivery(&event(
            "evt_1",
            "checkout.session.completed",
            checkout_session("u1", "sub_new", "plus"),
        ));
        cmd.signature = Some(
            signature_header("whsec_other", Timestamp::now().as_unix_secs(), &cmd.payload)
                .unwrap(),
        );

        let err = handler(&h).handle(cmd).await.unwrap_err();

        assert!(matches!(err, WebhookError::InvalidSignature));
        assert!(h.subscriptions.all().is_empty());
        assert!(h.webhook_events.is_empty());
        assert_eq!(h.plan_of(&UserId::new("u1").unwrap()), PlanId::Free);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let h = Harness::new();
        let mut cmd = delivery(&event("evt_1", "invoice.paid", json!({})));
        cmd.signature = None;

        let err = handler(&h).handle(cmd).await.unwrap_err();

        assert!(matches!(err, WebhookError::MissingSignature));
        assert!(h.webhook_events.is_empty());
    }

    #[tokio::test]
    async fn unknown_event_type_is_recorded_as_ignored() {
        let h = Harness::new();

        let result = handler(&h)
            .handle(delivery(&event("evt_1", "customer.created", json!({"id": "cus_1"}))))
            .await
            .unwrap();

        assert!(ignored(&result));
        assert_eq!(h.webhook_events.len(), 1);
    }

    #[tokio::test]
    async fn livemode_mismatch_is_ignored() {
        let h = Harness::new();
        h.user("u1", PlanId::Free);
        let settings = ReconcilerSettings {
            expected_livemode: Some(true),
            ..Default::default()
        };

        let result = handler_with(&h, settings)
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("u1", "sub_new", "plus"),
            )))
            .await
            .unwrap();

        assert!(ignored(&result));
        assert!(h.subscriptions.all().is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout.session.completed
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn checkout_opens_subscription_and_sets_plan() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Free);

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("u1", "sub_new", "plus"),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        let record = h
            .subscriptions
            .find_by_external_ref("sub_new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.plan, PlanId::Plus);
        assert_eq!(record.external_customer_ref, "cus_u1");
        assert_eq!(h.plan_of(&user), PlanId::Plus);
        assert_eq!(h.notifier.email_kinds(), vec![EmailKind::SubscriptionStarted]);
        assert_eq!(h.gateway.call_count("retrieve_subscription"), 0);
    }

    #[tokio::test]
    async fn redelivered_event_is_duplicate() {
        let h = Harness::new();
        h.user("u1", PlanId::Free);
        let handler = handler(&h);
        let evt = event(
            "evt_1",
            "checkout.session.completed",
            checkout_session("u1", "sub_new", "plus"),
        );

        handler.handle(delivery(&evt)).await.unwrap();
        let second = handler.handle(delivery(&evt)).await.unwrap();

        assert_eq!(second.disposition, WebhookDisposition::Duplicate);
        assert_eq!(h.subscriptions.all().len(), 1);
    }

    #[tokio::test]
    async fn checkout_for_recorded_subscription_is_ignored() {
        let h = Harness::new();
        h.user("u1", PlanId::Free);
        let handler = handler(&h);
        let object = checkout_session("u1", "sub_new", "plus");

        handler
            .handle(delivery(&event("evt_1", "checkout.session.completed", object.clone())))
            .await
            .unwrap();
        let second = handler
            .handle(delivery(&event("evt_2", "checkout.session.completed", object)))
            .await
            .unwrap();

        assert!(ignored(&second));
        assert_eq!(h.subscriptions.all().len(), 1);
    }

    #[tokio::test]
    async fn checkout_replaces_previous_subscription() {
        let h = Harness::new();
        let old = h.subscribed("u1", PlanId::Plus).await;

        handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("u1", "sub_second", "pro"),
            )))
            .await
            .unwrap();

        let old = h.record(&old.id).await;
        assert_eq!(old.lifecycle(), LifecycleState::Canceled);
        assert_eq!(
            h.gateway.subscription(&old.external_subscription_ref).unwrap().status,
            "canceled"
        );
        assert_eq!(h.plan_of(&old.user_id), PlanId::Pro);
        assert!(h
            .notifier
            .audit_actions()
            .contains(&AuditAction::SubscriptionReplaced));
    }

    #[tokio::test]
    async fn checkout_replacement_survives_gateway_cancel_failure() {
        let h = Harness::new();
        let old = h.subscribed("u1", PlanId::Plus).await;
        h.gateway.set_method_error(
            "cancel_subscription",
            crate::ports::GatewayError::network("down"),
        );

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("u1", "sub_second", "pro"),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        assert_eq!(h.record(&old.id).await.lifecycle(), LifecycleState::Canceled);
        assert_eq!(h.plan_of(&old.user_id), PlanId::Pro);
    }

    #[tokio::test]
    async fn checkout_without_metadata_reads_plan_from_processor() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Free);
        h.gateway.add_subscription(crate::ports::ExternalSubscription {
            id: "sub_new".to_string(),
            customer_ref: "cus_u1".to_string(),
            status: "active".to_string(),
            cancel_at_period_end: false,
            current_period_end: None,
            price_ref: Some("price_pro_annual".to_string()),
            item_ref: Some("si_1".to_string()),
        });
        let object = json!({
            "id": "cs_1",
            "subscription": "sub_new",
            "customer_details": { "email": "U1@example.com" }
        });

        let result = handler(&h)
            .handle(delivery(&event("evt_1", "checkout.session.completed", object)))
            .await
            .unwrap();

        assert!(applied(&result));
        let record = h.subscriptions.find_latest_by_user(&user).await.unwrap().unwrap();
        assert_eq!(record.plan, PlanId::Pro);
        assert_eq!(record.interval, BillingInterval::Annual);
        assert_eq!(record.external_customer_ref, "cus_u1");
    }

    #[tokio::test]
    async fn checkout_for_unknown_user_fails_and_stays_unrecorded() {
        let h = Harness::new();

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("ghost", "sub_new", "plus"),
            )))
            .await
            .unwrap();

        assert!(matches!(result.disposition, WebhookDisposition::Failed(_)));
        assert!(h.webhook_events.is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.updated
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn due_downgrade_is_applied() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Pro).await;
        record
            .schedule_downgrade(PlanId::Plus, Timestamp::now().plus_secs(-10))
            .unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", false),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.plan, PlanId::Plus);
        assert!(stored.pending_plan.is_none());
        assert_eq!(h.plan_of(&record.user_id), PlanId::Plus);
    }

    #[tokio::test]
    async fn due_downgrade_and_processor_cancellation_apply_together() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Pro).await;
        record
            .schedule_downgrade(PlanId::Plus, Timestamp::now().plus_secs(-10))
            .unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", true),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.plan, PlanId::Plus);
        assert_eq!(stored.lifecycle(), LifecycleState::Canceling);
        assert_eq!(stored.pending_plan, Some(PlanId::Free));
        assert_eq!(h.plan_of(&record.user_id), PlanId::Plus);
        assert_eq!(
            h.notifier.audit_actions(),
            vec![AuditAction::DowngradeApplied, AuditAction::CancellationScheduled]
        );
    }

    #[tokio::test]
    async fn future_downgrade_is_left_pending() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Pro).await;
        record
            .schedule_downgrade(PlanId::Plus, Timestamp::now().add_days(20))
            .unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", false),
            )))
            .await
            .unwrap();

        assert!(ignored(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.plan, PlanId::Pro);
        assert_eq!(stored.pending_plan, Some(PlanId::Plus));
        assert_eq!(h.plan_of(&record.user_id), PlanId::Pro);
    }

    #[tokio::test]
    async fn cancellation_from_processor_portal_is_mirrored() {
        let h = Harness::new();
        let record = h.subscribed("u1", PlanId::Plus).await;

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", true),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.lifecycle(), LifecycleState::Canceling);
        assert_eq!(stored.pending_plan, Some(PlanId::Free));
        assert_eq!(h.plan_of(&record.user_id), PlanId::Plus);
    }

    #[tokio::test]
    async fn stale_update_does_not_undo_reactivation() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Plus).await;
        record.schedule_cancellation(Timestamp::now().add_days(20)).unwrap();
        record.reactivate().unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let created = Timestamp::now().plus_secs(-120).as_unix_secs();
        let result = handler(&h)
            .handle(delivery(&event_at(
                "evt_old",
                "customer.subscription.updated",
                created,
                subscription_object(&record, "price_plus_monthly", true),
            )))
            .await
            .unwrap();

        assert!(ignored(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.lifecycle(), LifecycleState::Active);
        assert!(!stored.cancel_at_period_end);
    }

    #[tokio::test]
    async fn processor_reactivation_keeps_billed_downgrade_pending() {
        let h = Harness::new();
        let mut record = h.subscribed("u1", PlanId::Pro).await;
        record
            .schedule_downgrade(PlanId::Plus, Timestamp::now().add_days(20))
            .unwrap();
        record.schedule_cancellation(Timestamp::now().add_days(20)).unwrap();
        h.subscriptions.update(&record).await.unwrap();

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", false),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        let stored = h.record(&record.id).await;
        assert_eq!(stored.plan, PlanId::Pro);
        assert_eq!(stored.lifecycle(), LifecycleState::PendingDowngrade);
        assert_eq!(stored.pending_downgrade(), Some(PlanId::Plus));
        assert_eq!(h.plan_of(&record.user_id), PlanId::Pro);
    }

    #[tokio::test]
    async fn plan_change_at_processor_is_mirrored() {
        let h = Harness::new();
        let record = h.subscribed("u1", PlanId::Plus).await;

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_pro_monthly", false),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        assert_eq!(h.record(&record.id).await.plan, PlanId::Pro);
        assert_eq!(h.plan_of(&record.user_id), PlanId::Pro);
    }

    #[tokio::test]
    async fn update_for_unknown_subscription_is_ignored() {
        let h = Harness::new();
        let record = crate::domain::billing::test_support::active_record("u9", PlanId::Plus);

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "customer.subscription.updated",
                subscription_object(&record, "price_plus_monthly", false),
            )))
            .await
            .unwrap();

        assert!(ignored(&result));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.deleted
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn deletion_ends_record_and_falls_back_to_free() {
        let h = Harness::new();
        let record = h.subscribed("u1", PlanId::Pro).await;
        let handler = handler(&h);
        let object = subscription_object(&record, "price_pro_monthly", false);

        let first = handler
            .handle(delivery(&event("evt_1", "customer.subscription.deleted", object.clone())))
            .await
            .unwrap();
        let second = handler
            .handle(delivery(&event("evt_2", "customer.subscription.deleted", object)))
            .await
            .unwrap();

        assert!(applied(&first));
        assert!(ignored(&second));
        assert_eq!(h.record(&record.id).await.lifecycle(), LifecycleState::Canceled);
        assert_eq!(h.plan_of(&record.user_id), PlanId::Free);
    }

    #[tokio::test]
    async fn deletion_of_superseded_subscription_keeps_plan() {
        let h = Harness::new();
        let old = h.subscribed("u1", PlanId::Plus).await;
        let handler = handler(&h);
        handler
            .handle(delivery(&event(
                "evt_1",
                "checkout.session.completed",
                checkout_session("u1", "sub_second", "pro"),
            )))
            .await
            .unwrap();

        // The replaced record is already canceled locally.
        let result = handler
            .handle(delivery(&event(
                "evt_2",
                "customer.subscription.deleted",
                subscription_object(&old, "price_plus_monthly", false),
            )))
            .await
            .unwrap();

        assert!(ignored(&result));
        assert_eq!(h.plan_of(&old.user_id), PlanId::Pro);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice.paid
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn invoice_replay_creates_one_record() {
        let h = Harness::new();
        let record = h.subscribed("u1", PlanId::Pro).await;
        let handler = handler(&h);
        let object = invoice("in_1", &record.external_customer_ref, None);

        let first = handler
            .handle(delivery(&event("evt_1", "invoice.paid", object.clone())))
            .await
            .unwrap();
        let duplicate = handler
            .handle(delivery(&event("evt_1", "invoice.paid", object.clone())))
            .await
            .unwrap();
        let replay = handler
            .handle(delivery(&event("evt_2", "invoice.paid", object)))
            .await
            .unwrap();

        assert!(applied(&first));
        assert_eq!(duplicate.disposition, WebhookDisposition::Duplicate);
        assert!(ignored(&replay));
        let records = h.billing_records.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, record.user_id);
        assert_eq!(records[0].amount, 1900);
        assert_eq!(records[0].plan, Some(PlanId::Pro));
    }

    #[tokio::test]
    async fn invoice_before_checkout_resolves_user_by_customer_email() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Free);
        h.gateway.add_customer("cus_fresh", Some("u1@example.com"));

        let result = handler(&h)
            .handle(delivery(&event("evt_1", "invoice.paid", invoice("in_1", "cus_fresh", None))))
            .await
            .unwrap();

        assert!(applied(&result));
        assert_eq!(h.billing_records.all()[0].user_id, user);
    }

    #[tokio::test]
    async fn invoice_falls_back_to_invoice_email() {
        let h = Harness::new();
        let user = h.user("u1", PlanId::Free);

        let result = handler(&h)
            .handle(delivery(&event(
                "evt_1",
                "invoice.paid",
                invoice("in_1", "cus_unknown", Some("u1@example.com")),
            )))
            .await
            .unwrap();

        assert!(applied(&result));
        assert_eq!(h.billing_records.all()[0].user_id, user);
    }

    #[tokio::test]
    async fn unresolvable_invoice_fails_without_recording_event() {
        let h = Harness::new();

        let result = handler(&h)
            .handle(delivery(&event("evt_1", "invoice.paid", invoice("in_1", "cus_x", None))))
            .await
            .unwrap();

        assert!(matches!(result.disposition, WebhookDisposition::Failed(_)));
        assert!(h.billing_records.all().is_empty());
        assert!(h.webhook_events.is_empty());
    }

    #[tokio::test]
    async fn malformed_object_fails_processing() {
        let h = Harness::new();

        let result = handler(&h)
            .handle(delivery(&event("evt_1", "invoice.paid", json!({"amount_paid": 5}))))
            .await
            .unwrap();

        assert!(matches!(result.disposition, WebhookDisposition::Failed(_)));
    }
}
