//! Application configuration module
//!
//! Configuration is read from environment variables with the `GALLERY_BILLING`
//! prefix, using `config` and `dotenvy`. Nested values are separated by a double
//! underscore.
//!
//! # Example
//!
//! ```no_run
//! use gallery_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod payment;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::{PaymentConfig, PriceIds};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Payment configuration (Stripe keys and price ids)
    pub payment: PaymentConfig,

    /// Checkout redirects and webhook reconciliation
    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `GALLERY_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `GALLERY_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `GALLERY_BILLING__PAYMENT__PRICES__PRO_MONTHLY=price_...` -> `payment.prices.pro_monthly`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("GALLERY_BILLING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate()?;
        self.billing.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "GALLERY_BILLING__DATABASE__URL",
        "GALLERY_BILLING__PAYMENT__STRIPE_API_KEY",
        "GALLERY_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET",
        "GALLERY_BILLING__PAYMENT__PRICES__PRO_MONTHLY",
        "GALLERY_BILLING__SERVER__PORT",
        "GALLERY_BILLING__SERVER__ENVIRONMENT",
        "GALLERY_BILLING__BILLING__APP_BASE_URL",
    ];

    fn set_minimal_env() {
        env::set_var("GALLERY_BILLING__DATABASE__URL", "postgresql://test@localhost/test");
        env::set_var("GALLERY_BILLING__PAYMENT__STRIPE_API_KEY", "sk_test_xxx");
        env::set_var("GALLERY_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn load_with(extra: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        set_minimal_env();
        for (key, value) in extra {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let result = load_with(&[]);

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.database.url, "postgresql://test@localhost/test");
        assert!(config.payment.is_test_mode());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[]).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.billing.pending_change_tolerance_secs, 300);
        assert!(!config.payment.require_livemode);
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[("GALLERY_BILLING__SERVER__ENVIRONMENT", "production")]).unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_custom_server_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[("GALLERY_BILLING__SERVER__PORT", "3000")]).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_nested_price_ids() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[(
            "GALLERY_BILLING__PAYMENT__PRICES__PRO_MONTHLY",
            "price_pro_monthly",
        )])
        .unwrap();

        assert_eq!(
            config.payment.prices.pro_monthly.as_deref(),
            Some("price_pro_monthly")
        );
        assert!(!config
            .payment
            .missing_prices()
            .contains(&"pro_monthly".to_string()));
    }

    #[test]
    fn test_missing_database_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("GALLERY_BILLING__PAYMENT__STRIPE_API_KEY", "sk_test_xxx");
        env::set_var("GALLERY_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx");
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_err());
    }
}
