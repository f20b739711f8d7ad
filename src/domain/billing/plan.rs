//! Plan identifiers and billing intervals.
//!
//! Every plan string that enters the system passes through [`PlanId::normalize`],
//! which folds legacy marketing names onto the canonical ids before any
//! lifecycle decision is made.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

/// Canonical plan identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum PlanId {
    /// Evaluation plan, no external subscription.
    Free,
    /// Entry paid plan.
    Plus,
    /// Top paid plan.
    Pro,
}

/// Accepted spellings for each plan, including retired names.
static PLAN_ALIASES: Lazy<HashMap<&'static str, PlanId>> = Lazy::new(|| {
    HashMap::from([
        ("free", PlanId::Free),
        ("plus", PlanId::Plus),
        ("pro", PlanId::Pro),
        // Retired names still present on old accounts and processor metadata.
        ("professional", PlanId::Plus),
        ("business", PlanId::Pro),
    ])
});

impl PlanId {
    /// All canonical plans, cheapest first.
    pub const ALL: [PlanId; 3] = [PlanId::Free, PlanId::Plus, PlanId::Pro];

    /// Maps any accepted spelling (case-insensitive, trimmed) to a canonical id.
    pub fn normalize(raw: &str) -> Result<Self, ValidationError> {
        let key = raw.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ValidationError::empty_field("plan"));
        }
        PLAN_ALIASES
            .get(key.as_str())
            .copied()
            .ok_or_else(|| ValidationError::unknown_value("plan", raw.trim()))
    }

    /// Returns the canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Plus => "plus",
            PlanId::Pro => "pro",
        }
    }

    /// Returns true if this plan is billed through the payment processor.
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanId::Free)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for PlanId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

/// Billing cadence of a paid subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Annual,
}

impl BillingInterval {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Annual => "annual",
        }
    }

    /// Nominal length of one billing period.
    pub fn days(&self) -> i64 {
        match self {
            BillingInterval::Monthly => 30,
            BillingInterval::Annual => 365,
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(BillingInterval::Monthly),
            "annual" | "yearly" | "year" => Ok(BillingInterval::Annual),
            other => Err(ValidationError::unknown_value("interval", other)),
        }
    }
}
