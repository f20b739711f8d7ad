//! Gallery billing service.
//!
//! Loads configuration, connects to PostgreSQL, wires the Stripe gateway into
//! the billing handlers and serves the billing API.

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gallery_billing::adapters::http::{billing_router, BillingAppState};
use gallery_billing::adapters::notifications::{TracingAuditLog, TracingMailer};
use gallery_billing::adapters::postgres::{
    PostgresBillingRecordRepository, PostgresCollaborators, PostgresSubscriptionRepository,
    PostgresUserDirectory, PostgresWebhookEventRepository,
};
use gallery_billing::adapters::stripe::StripeBillingGateway;
use gallery_billing::application::billing::{
    BillingContext, CheckoutUrls, EffectDispatcher, ReconcilerSettings,
};
use gallery_billing::config::{AppConfig, ConfigError, ValidationError};
use gallery_billing::domain::billing::StripeWebhookVerifier;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        livemode = config.payment.is_live_mode(),
        "Starting gallery billing"
    );

    let missing = config.payment.missing_prices();
    if !missing.is_empty() {
        tracing::warn!(?missing, "Checkout is disabled for plans without a price id");
    }

    let pool = config.database.connect().await?;
    tracing::info!("Database connection established");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    let collaborators = Arc::new(PostgresCollaborators::new(pool.clone()));
    let ctx = BillingContext {
        users: Arc::new(PostgresUserDirectory::new(pool.clone())),
        subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
        gateway: Arc::new(StripeBillingGateway::new(config.payment.stripe_config())),
        usage: collaborators.clone(),
        galleries: collaborators.clone(),
        refunds: collaborators.clone(),
        catalog: Arc::new(config.payment.catalog()),
        effects: Arc::new(EffectDispatcher::new(
            Arc::new(TracingAuditLog),
            Arc::new(TracingMailer),
            collaborators,
        )),
    };

    let state = BillingAppState {
        ctx,
        billing_records: Arc::new(PostgresBillingRecordRepository::new(pool.clone())),
        webhook_events: Arc::new(PostgresWebhookEventRepository::new(pool)),
        webhook_verifier: StripeWebhookVerifier::new(config.payment.stripe_webhook_secret.clone()),
        checkout_urls: CheckoutUrls::from_base_url(config.billing.base_url()),
        reconciler: ReconcilerSettings {
            expected_livemode: config.payment.expected_livemode(),
            pending_change_tolerance_secs: config.billing.pending_change_tolerance_secs,
        },
    };

    let app = build_app(&config, state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Billing API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// JSON logs in production, human-readable output elsewhere.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_app(config: &AppConfig, state: BillingAppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health_check))
        .merge(billing_router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(cors_layer(&config.server.cors_origins_list()))
                .layer(TimeoutLayer::new(config.server.request_timeout())),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-user-id"),
        ])
        .allow_origin(AllowOrigin::list(origins))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
