//! WebhookEventRepository port - Interface for tracking processed Stripe webhooks.
//!
//! This port enables idempotent webhook handling by tracking which webhook events
//! have been handled. Only handled events are stored; a delivery whose handler
//! failed stays unrecorded so the sender's retry gets another attempt.
//!
//! ## Why Webhook Idempotency Matters
//!
//! Stripe may deliver the same webhook multiple times due to:
//! - Network timeouts
//! - 5xx response from our endpoint (triggers retry)
//! - Our endpoint returning success but Stripe not receiving it
//!
//! Handlers stay idempotent on their own; this store only short-circuits
//! the common redelivery case.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, Timestamp};

/// How a webhook event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Success,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Success => "success",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

impl std::str::FromStr for WebhookOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(WebhookOutcome::Success),
            "ignored" => Ok(WebhookOutcome::Ignored),
            other => Err(DomainError::validation(
                "result",
                format!("Unknown webhook outcome: {}", other),
            )),
        }
    }
}

/// Record of a processed webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedWebhookEvent {
    /// Stripe event ID (evt_xxx format).
    pub event_id: String,

    /// Type of Stripe event (e.g., "checkout.session.completed").
    pub event_type: String,

    pub result: WebhookOutcome,

    /// Why the event was ignored, if it was.
    pub note: Option<String>,

    pub processed_at: Timestamp,
}

impl ProcessedWebhookEvent {
    /// Creates a new success record.
    pub fn success(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            result: WebhookOutcome::Success,
            note: None,
            processed_at: Timestamp::now(),
        }
    }

    /// Creates a new ignored record.
    pub fn ignored(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            result: WebhookOutcome::Ignored,
            note: Some(reason.into()),
            processed_at: Timestamp::now(),
        }
    }
}

/// Result of attempting to save a uniquely keyed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted (first time seeing this key).
    Inserted,
    /// Record already exists (duplicate).
    AlreadyExists,
}

/// Port for storing and retrieving processed webhook events.
///
/// Implementations should use database constraints (PRIMARY KEY on event_id)
/// to prevent race conditions during concurrent webhook processing.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Find a previously processed event by its Stripe event ID.
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<ProcessedWebhookEvent>, DomainError>;

    /// Attempt to save a webhook event record.
    ///
    /// Uses `ON CONFLICT DO NOTHING` semantics to handle race conditions.
    async fn save(&self, record: &ProcessedWebhookEvent) -> Result<SaveResult, DomainError>;
}
