//! Plan catalog.
//!
//! The catalog is built once at process start. Prices and limits are compiled in;
//! the processor's price references come from configuration because they differ
//! between test and live mode.

use serde::Serialize;

use super::{BillingInterval, PlanId, PlanLimits};
use crate::domain::foundation::ValidationError;

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub display_name: String,
    /// Monthly price in cents.
    pub monthly_price: i64,
    /// Annual price in cents.
    pub annual_price: i64,
    pub external_price_ref_monthly: Option<String>,
    pub external_price_ref_annual: Option<String>,
    /// Ordinal used to classify upgrades and downgrades.
    pub level: u8,
    pub limits: PlanLimits,
}

impl Plan {
    /// Returns the processor price reference for an interval, if configured.
    pub fn price_ref(&self, interval: BillingInterval) -> Option<&str> {
        match interval {
            BillingInterval::Monthly => self.external_price_ref_monthly.as_deref(),
            BillingInterval::Annual => self.external_price_ref_annual.as_deref(),
        }
    }

    /// Returns the price in cents for an interval.
    pub fn price(&self, interval: BillingInterval) -> i64 {
        match interval {
            BillingInterval::Monthly => self.monthly_price,
            BillingInterval::Annual => self.annual_price,
        }
    }
}

/// Static table of plans.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Builds a catalog from an explicit plan list.
    ///
    /// Every canonical plan must appear exactly once, and ordering by level must
    /// agree with ordering by monthly and annual price.
    pub fn new(mut plans: Vec<Plan>) -> Result<Self, ValidationError> {
        for id in PlanId::ALL {
            let count = plans.iter().filter(|p| p.id == id).count();
            if count != 1 {
                return Err(ValidationError::invalid_format(
                    "plan_catalog",
                    format!("plan '{}' must appear exactly once, found {}", id, count),
                ));
            }
        }

        plans.sort_by_key(|p| p.level);
        for pair in plans.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if lower.level == higher.level {
                return Err(ValidationError::invalid_format(
                    "plan_catalog",
                    format!("plans '{}' and '{}' share a level", lower.id, higher.id),
                ));
            }
            if higher.monthly_price <= lower.monthly_price
                || higher.annual_price <= lower.annual_price
            {
                return Err(ValidationError::invalid_format(
                    "plan_catalog",
                    format!("plan '{}' must cost more than '{}'", higher.id, lower.id),
                ));
            }
        }

        Ok(Self { plans })
    }

    /// The standard catalog without processor price references.
    pub fn standard() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: PlanId::Free,
                    display_name: "Free".to_string(),
                    monthly_price: 0,
                    annual_price: 0,
                    external_price_ref_monthly: None,
                    external_price_ref_annual: None,
                    level: 0,
                    limits: PlanLimits::free(),
                },
                Plan {
                    id: PlanId::Plus,
                    display_name: "Plus".to_string(),
                    monthly_price: 1_200,
                    annual_price: 12_000,
                    external_price_ref_monthly: None,
                    external_price_ref_annual: None,
                    level: 1,
                    limits: PlanLimits::plus(),
                },
                Plan {
                    id: PlanId::Pro,
                    display_name: "Pro".to_string(),
                    monthly_price: 2_900,
                    annual_price: 29_000,
                    external_price_ref_monthly: None,
                    external_price_ref_annual: None,
                    level: 2,
                    limits: PlanLimits::pro(),
                },
            ],
        }
    }

    /// Attaches a processor price reference to a plan and interval.
    pub fn with_price_ref(
        mut self,
        plan: PlanId,
        interval: BillingInterval,
        price_ref: impl Into<String>,
    ) -> Self {
        if let Some(entry) = self.plans.iter_mut().find(|p| p.id == plan) {
            let price_ref = Some(price_ref.into());
            match interval {
                BillingInterval::Monthly => entry.external_price_ref_monthly = price_ref,
                BillingInterval::Annual => entry.external_price_ref_annual = price_ref,
            }
        }
        self
    }

    /// Looks up a plan.
    pub fn get(&self, id: PlanId) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    /// Returns the level of a plan, if present.
    pub fn level(&self, id: PlanId) -> Option<u8> {
        self.get(id).map(|p| p.level)
    }

    /// Reverse lookup from a processor price reference.
    pub fn plan_for_price_ref(&self, price_ref: &str) -> Option<(PlanId, BillingInterval)> {
        self.plans.iter().find_map(|p| {
            if p.external_price_ref_monthly.as_deref() == Some(price_ref) {
                Some((p.id, BillingInterval::Monthly))
            } else if p.external_price_ref_annual.as_deref() == Some(price_ref) {
                Some((p.id, BillingInterval::Annual))
            } else {
                None
            }
        })
    }

    /// All plans ordered by level.
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced_catalog() -> PlanCatalog {
        PlanCatalog::standard()
            .with_price_ref(PlanId::Plus, BillingInterval::Monthly, "price_plus_m")
            .with_price_ref(PlanId::Plus, BillingInterval::Annual, "price_plus_y")
            .with_price_ref(PlanId::Pro, BillingInterval::Monthly, "price_pro_m")
    }

    #[test]
    fn standard_catalog_passes_validation() {
        let plans = PlanCatalog::standard().plans().to_vec();
        assert!(PlanCatalog::new(plans).is_ok());
    }

    #[test]
    fn levels_are_monotonic_with_price() {
        let catalog = PlanCatalog::standard();
        for pair in catalog.plans().windows(2) {
            assert!(pair[0].level < pair[1].level);
            assert!(pair[0].monthly_price < pair[1].monthly_price);
            assert!(pair[0].annual_price < pair[1].annual_price);
        }
    }

    #[test]
    fn catalog_rejects_price_inversion() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans[2].monthly_price = 500;
        assert!(PlanCatalog::new(plans).is_err());
    }

    #[test]
    fn catalog_rejects_missing_plan() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans.pop();
        assert!(PlanCatalog::new(plans).is_err());
    }

    #[test]
    fn price_refs_resolve_both_ways() {
        let catalog = priced_catalog();
        let plus = catalog.get(PlanId::Plus).unwrap();

        assert_eq!(plus.price_ref(BillingInterval::Annual), Some("price_plus_y"));
        assert_eq!(
            catalog.plan_for_price_ref("price_pro_m"),
            Some((PlanId::Pro, BillingInterval::Monthly))
        );
        assert_eq!(catalog.plan_for_price_ref("price_unknown"), None);
    }

    #[test]
    fn unconfigured_interval_has_no_price_ref() {
        let catalog = priced_catalog();
        let pro = catalog.get(PlanId::Pro).unwrap();
        assert_eq!(pro.price_ref(BillingInterval::Annual), None);
    }

    #[test]
    fn free_plan_has_lowest_level() {
        let catalog = PlanCatalog::standard();
        assert_eq!(catalog.level(PlanId::Free), Some(0));
        assert!(catalog.level(PlanId::Plus) < catalog.level(PlanId::Pro));
    }
}
