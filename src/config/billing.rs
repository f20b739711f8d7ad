//! Billing behaviour configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Billing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Public web app URL; checkout redirects return here
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    /// How early a scheduled downgrade may be applied by a webhook, in seconds
    #[serde(default = "default_pending_change_tolerance")]
    pub pending_change_tolerance_secs: i64,
}

impl BillingConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.app_base_url.trim_end_matches('/')
    }

    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.app_base_url.starts_with("http://") && !self.app_base_url.starts_with("https://")
        {
            return Err(ValidationError::InvalidBaseUrl(self.app_base_url.clone()));
        }
        if !(0..=3600).contains(&self.pending_change_tolerance_secs) {
            return Err(ValidationError::InvalidTolerance);
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            app_base_url: default_app_base_url(),
            pending_change_tolerance_secs: default_pending_change_tolerance(),
        }
    }
}

fn default_app_base_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_pending_change_tolerance() -> i64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BillingConfig::default();
        assert_eq!(config.pending_change_tolerance_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let config = BillingConfig {
            app_base_url: "https://gallery.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://gallery.example.com");
    }

    #[test]
    fn rejects_relative_base_url() {
        let config = BillingConfig {
            app_base_url: "gallery.example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn rejects_tolerance_out_of_range() {
        let config = BillingConfig {
            pending_change_tolerance_secs: -1,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidTolerance));
    }
}
