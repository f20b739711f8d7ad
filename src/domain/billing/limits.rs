//! Plan limits and downgrade limit evaluation.

use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Resource and feature limits attached to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Total original-photo storage.
    pub storage_bytes: u64,
    /// Maximum galleries. None = unlimited.
    pub max_galleries: Option<u32>,
    /// Serve galleries from the photographer's own domain.
    pub custom_domain: bool,
    /// Hide platform branding on client galleries.
    pub remove_branding: bool,
    /// Client favourites / proofing workflow.
    pub client_proofing: bool,
}

impl PlanLimits {
    /// Limits for the free plan.
    pub fn free() -> Self {
        Self {
            storage_bytes: 2 * GIB,
            max_galleries: Some(3),
            custom_domain: false,
            remove_branding: false,
            client_proofing: false,
        }
    }

    /// Limits for the plus plan.
    pub fn plus() -> Self {
        Self {
            storage_bytes: 100 * GIB,
            max_galleries: Some(50),
            custom_domain: false,
            remove_branding: true,
            client_proofing: true,
        }
    }

    /// Limits for the pro plan.
    pub fn pro() -> Self {
        Self {
            storage_bytes: 1024 * GIB,
            max_galleries: None,
            custom_domain: true,
            remove_branding: true,
            client_proofing: true,
        }
    }

    /// Lists every way `usage` exceeds these limits.
    ///
    /// An empty result means a move onto these limits loses nothing.
    pub fn violations(&self, usage: &UsageSnapshot) -> Vec<LimitViolation> {
        let mut violations = Vec::new();

        if usage.storage_bytes > self.storage_bytes {
            violations.push(LimitViolation {
                kind: LimitKind::Storage,
                current: usage.storage_bytes,
                allowed: self.storage_bytes,
                message: format!(
                    "Storage in use ({}) exceeds the plan allowance ({})",
                    format_bytes(usage.storage_bytes),
                    format_bytes(self.storage_bytes)
                ),
            });
        }

        if let Some(max) = self.max_galleries {
            if usage.gallery_count > max {
                violations.push(LimitViolation {
                    kind: LimitKind::Galleries,
                    current: u64::from(usage.gallery_count),
                    allowed: u64::from(max),
                    message: format!(
                        "{} galleries exist but the plan allows {}; delete {} to continue",
                        usage.gallery_count,
                        max,
                        usage.gallery_count - max
                    ),
                });
            }
        }

        if usage.custom_domain_in_use && !self.custom_domain {
            violations.push(LimitViolation {
                kind: LimitKind::CustomDomain,
                current: 1,
                allowed: 0,
                message: "A custom domain is connected but the plan does not include one"
                    .to_string(),
            });
        }

        violations
    }
}

/// Point-in-time usage reported by the quota subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub storage_bytes: u64,
    pub gallery_count: u32,
    pub custom_domain_in_use: bool,
}

/// Which limit a violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Storage,
    Galleries,
    CustomDomain,
}

/// One itemized reason a downgrade cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub kind: LimitKind,
    pub current: u64,
    pub allowed: u64,
    pub message: String,
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
