//! CheckDowngradeHandler - Query handler previewing what a downgrade would lose.

use crate::domain::billing::{BillingError, LimitViolation, PlanId, UsageSnapshot};
use crate::domain::foundation::UserId;

use super::BillingContext;

#[derive(Debug, Clone)]
pub struct CheckDowngradeQuery {
    pub user_id: UserId,
    pub target_plan: String,
}

#[derive(Debug, Clone)]
pub struct CheckDowngradeResult {
    pub current_plan: PlanId,
    pub target_plan: PlanId,
    pub usage: UsageSnapshot,
    /// Empty when the downgrade can proceed.
    pub violations: Vec<LimitViolation>,
}

impl CheckDowngradeResult {
    pub fn allowed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Read-only: compares current usage with the target plan's limits.
pub struct CheckDowngradeHandler {
    ctx: BillingContext,
}

impl CheckDowngradeHandler {
    pub fn new(ctx: BillingContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(
        &self,
        query: CheckDowngradeQuery,
    ) -> Result<CheckDowngradeResult, BillingError> {
        let target = self.ctx.plan(&query.target_plan)?;
        let account = self.ctx.load_account(&query.user_id).await?;
        let usage = self.ctx.usage.usage_for(&query.user_id).await?;

        Ok(CheckDowngradeResult {
            current_plan: account.state.current_plan,
            target_plan: target.id,
            violations: target.limits.violations(&usage),
            usage,
        })
    }
}
