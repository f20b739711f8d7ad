//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Json, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::handlers::billing::{
    BillingContext, CancelSubscriptionCommand, CancelSubscriptionHandler, ChangePlanCommand,
    ChangePlanHandler, CheckDowngradeHandler, CheckDowngradeQuery, CheckoutUrls,
    CreateCheckoutCommand, CreateCheckoutHandler, DowngradeWithCleanupCommand,
    DowngradeWithCleanupHandler, GetSubscriptionHandler, GetSubscriptionQuery,
    HandleBillingWebhookCommand, HandleBillingWebhookHandler, ListBillingHistoryHandler,
    ListBillingHistoryQuery, ReconcilerSettings,
};
use crate::domain::billing::{
    BillingError, GatewayFailure, RejectionCode, StripeWebhookVerifier, WebhookError,
};
use crate::domain::foundation::UserId;
use crate::ports::{BillingRecordRepository, WebhookEventRepository};

use super::dto::{
    BillingHistoryResponse, BillingRecordView, CancelResponse, ChangePlanRequest,
    CheckDowngradeParams, CheckDowngradeResponse, CheckoutRequest, CheckoutResponse,
    DowngradeResponse, DowngradeWithCleanupRequest, ErrorResponse, HistoryParams,
    PlanChangeResponse, SubscriptionResponse, WebhookAck,
};

/// Header carrying the processor's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Header carrying the authenticated caller, set by the routing layer in front of us.
pub const USER_HEADER: &str = "X-User-Id";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned for each request; handlers are built on demand from it.
#[derive(Clone)]
pub struct BillingAppState {
    pub ctx: BillingContext,
    pub billing_records: Arc<dyn BillingRecordRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub webhook_verifier: StripeWebhookVerifier,
    pub checkout_urls: CheckoutUrls,
    pub reconciler: ReconcilerSettings,
}

impl BillingAppState {
    pub fn checkout_handler(&self) -> CreateCheckoutHandler {
        CreateCheckoutHandler::new(self.ctx.clone(), self.checkout_urls.clone())
    }

    pub fn change_plan_handler(&self) -> ChangePlanHandler {
        ChangePlanHandler::new(self.ctx.clone())
    }

    pub fn cancel_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.ctx.clone())
    }

    pub fn check_downgrade_handler(&self) -> CheckDowngradeHandler {
        CheckDowngradeHandler::new(self.ctx.clone())
    }

    pub fn downgrade_handler(&self) -> DowngradeWithCleanupHandler {
        DowngradeWithCleanupHandler::new(self.ctx.clone())
    }

    pub fn subscription_handler(&self) -> GetSubscriptionHandler {
        GetSubscriptionHandler::new(self.ctx.clone())
    }

    pub fn history_handler(&self) -> ListBillingHistoryHandler {
        ListBillingHistoryHandler::new(self.ctx.users.clone(), self.billing_records.clone())
    }

    pub fn webhook_handler(&self) -> HandleBillingWebhookHandler {
        HandleBillingWebhookHandler::new(
            self.webhook_verifier.clone(),
            self.webhook_events.clone(),
            self.billing_records.clone(),
            self.ctx.clone(),
            self.reconciler.clone(),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// Authenticated caller.
///
/// Authentication happens upstream; the gateway forwards the user id in `X-User-Id`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s.trim()).ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /billing/subscription - Effective plan and latest subscription
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .subscription_handler()
        .handle(GetSubscriptionQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(SubscriptionResponse::from(result)))
}

/// GET /billing/subscription/check-downgrade?target_plan= - Limit check for a downgrade
pub async fn check_downgrade(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Query(params): Query<CheckDowngradeParams>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .check_downgrade_handler()
        .handle(CheckDowngradeQuery {
            user_id: user.user_id,
            target_plan: params.target_plan,
        })
        .await?;

    Ok(Json(CheckDowngradeResponse::from(result)))
}

/// GET /billing/history - Paid invoices, newest first
pub async fn billing_history(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .history_handler()
        .handle(ListBillingHistoryQuery {
            user_id: user.user_id,
            limit: params.limit,
        })
        .await?;

    Ok(Json(BillingHistoryResponse {
        records: result.records.into_iter().map(BillingRecordView::from).collect(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /billing/checkout - Start a hosted checkout
pub async fn create_checkout(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .checkout_handler()
        .handle(CreateCheckoutCommand {
            user_id: user.user_id,
            plan: request.plan,
            interval: request.interval,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(result))))
}

/// POST /billing/subscription/change-plan - Upgrade, downgrade or reactivate
pub async fn change_plan(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<ChangePlanRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .change_plan_handler()
        .handle(ChangePlanCommand {
            user_id: user.user_id,
            plan: request.plan,
        })
        .await?;

    Ok(Json(PlanChangeResponse::from(result)))
}

/// POST /billing/subscription/cancel - Cancel at period end
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .cancel_handler()
        .handle(CancelSubscriptionCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(CancelResponse::from(result)))
}

/// POST /billing/subscription/downgrade - Delete galleries, then downgrade
pub async fn downgrade_with_cleanup(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<DowngradeWithCleanupRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .downgrade_handler()
        .handle(DowngradeWithCleanupCommand {
            user_id: user.user_id,
            target_plan: request.target_plan,
            galleries_to_delete: request.galleries_to_delete,
        })
        .await?;

    Ok(Json(DowngradeResponse::from(result)))
}

/// POST /billing/webhook - Processor webhook deliveries
///
/// The body is taken raw; the signature covers its exact bytes.
pub async fn handle_billing_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let result = state
        .webhook_handler()
        .handle(HandleBillingWebhookCommand {
            payload: body.to_vec(),
            signature,
        })
        .await?;

    Ok(Json(WebhookAck::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl BillingApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::InvalidPlan(_)
            | BillingError::InvalidInterval(_)
            | BillingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BillingError::UserNotFound(_) | BillingError::NoActiveSubscription(_) => {
                StatusCode::NOT_FOUND
            }
            BillingError::Rejected(rejection) if rejection.code.is_conflict() => {
                StatusCode::CONFLICT
            }
            BillingError::Rejected(rejection)
                if rejection.code == RejectionCode::NoActiveSubscription =>
            {
                StatusCode::NOT_FOUND
            }
            BillingError::Rejected(_) => StatusCode::BAD_REQUEST,
            BillingError::ProcessingChange(_) | BillingError::InvalidState(_) => {
                StatusCode::CONFLICT
            }
            BillingError::DowngradeLimitsExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Gateway {
                failure: GatewayFailure::Misconfigured,
                ..
            } => StatusCode::INTERNAL_SERVER_ERROR,
            BillingError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            BillingError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match &self.0 {
            BillingError::DowngradeLimitsExceeded(violations) => {
                Some(serde_json::json!({ "violations": violations }))
            }
            BillingError::Gateway {
                failure: GatewayFailure::Misconfigured,
                hint: Some(hint),
                ..
            } => Some(serde_json::json!({ "hint": hint })),
            _ => None,
        }
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Billing request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Billing request rejected");
        }

        let mut body = ErrorResponse::new(self.0.code(), self.0.message());
        if let Some(details) = self.details() {
            body = body.with_details(details);
        }
        (status, Json(body)).into_response()
    }
}

/// Webhook rejection. Only verification failures reach this type.
#[derive(Debug)]
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (self.0.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{LimitKind, LimitViolation, TransitionRejection};
    use crate::domain::foundation::SubscriptionId;

    fn status_of(err: BillingError) -> StatusCode {
        BillingApiError::from(err).into_response().status()
    }

    fn rejection(code: RejectionCode) -> BillingError {
        TransitionRejection {
            code,
            reason: "nope".to_string(),
        }
        .into()
    }

    #[test]
    fn validation_rejections_are_bad_requests() {
        for code in [
            RejectionCode::SamePlan,
            RejectionCode::CancelRequired,
            RejectionCode::NothingToCancel,
            RejectionCode::NotCanceling,
            RejectionCode::InvalidTransition,
            RejectionCode::InvalidPlan,
        ] {
            assert_eq!(status_of(rejection(code)), StatusCode::BAD_REQUEST, "{}", code);
        }
        assert_eq!(
            status_of(BillingError::InvalidInterval("weekly".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn account_conflicts_are_409() {
        for code in [
            RejectionCode::AlreadySubscribed,
            RejectionCode::UseChangePlan,
            RejectionCode::RefundPending,
            RejectionCode::SubscriptionCanceled,
        ] {
            assert_eq!(status_of(rejection(code)), StatusCode::CONFLICT, "{}", code);
        }
        assert_eq!(
            status_of(BillingError::ProcessingChange(SubscriptionId::new())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn missing_things_are_404() {
        assert_eq!(
            status_of(rejection(RejectionCode::NoActiveSubscription)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BillingError::UserNotFound(UserId::new("u1").unwrap())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn limit_violations_are_itemized() {
        let err = BillingApiError::from(BillingError::DowngradeLimitsExceeded(vec![
            LimitViolation {
                kind: LimitKind::Galleries,
                current: 60,
                allowed: 50,
                message: "60 galleries, plan allows 50".to_string(),
            },
        ]));

        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let details = err.details().unwrap();
        assert_eq!(details["violations"][0]["kind"], "galleries");
    }

    #[test]
    fn gateway_failures_split_by_cause() {
        let misconfigured = BillingApiError::from(BillingError::Gateway {
            failure: GatewayFailure::Misconfigured,
            message: "No such price: price_123 (test mode)".to_string(),
            hint: Some("Set GALLERY_BILLING__PAYMENT__PRICES__PLUS_MONTHLY".to_string()),
        });
        assert_eq!(misconfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(misconfigured.0.code(), "BILLING_MISCONFIGURED");
        assert!(misconfigured.details().unwrap()["hint"]
            .as_str()
            .unwrap()
            .contains("PRICES"));

        assert_eq!(
            status_of(BillingError::Gateway {
                failure: GatewayFailure::Unavailable,
                message: "timeout".to_string(),
                hint: None,
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn webhook_signature_failure_is_401() {
        let response = WebhookApiError::from(WebhookError::InvalidSignature).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = WebhookApiError::from(WebhookError::MissingSecret).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
