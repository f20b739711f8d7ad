//! DowngradeWithCleanupHandler - Command handler that frees resources and then
//! schedules a downgrade.
//!
//! The request is validated as a downgrade before anything is deleted, so a
//! rejected request never costs the user a gallery.

use crate::domain::billing::{
    classify_change, validate_transition, BillingError, PlanAction, RejectionCode,
    TransitionRejection,
};
use crate::domain::foundation::{GalleryId, UserId};

use super::{BillingContext, ChangePlanCommand, ChangePlanHandler, ChangePlanResult};

#[derive(Debug, Clone)]
pub struct DowngradeWithCleanupCommand {
    pub user_id: UserId,
    pub target_plan: String,
    pub galleries_to_delete: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DowngradeWithCleanupResult {
    pub deleted_galleries: u32,
    pub change: ChangePlanResult,
}

pub struct DowngradeWithCleanupHandler {
    ctx: BillingContext,
    change_plan: ChangePlanHandler,
}

impl DowngradeWithCleanupHandler {
    pub fn new(ctx: BillingContext) -> Self {
        Self {
            change_plan: ChangePlanHandler::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn handle(
        &self,
        cmd: DowngradeWithCleanupCommand,
    ) -> Result<DowngradeWithCleanupResult, BillingError> {
        let gallery_ids = cmd
            .galleries_to_delete
            .iter()
            .map(GalleryId::new)
            .collect::<Result<Vec<_>, _>>()?;

        let target = self.ctx.target(&cmd.target_plan)?;
        let account = self.ctx.load_account(&cmd.user_id).await?;
        let action = classify_change(&account.state, target)?;
        if action != PlanAction::Downgrade {
            return Err(TransitionRejection {
                code: RejectionCode::InvalidTransition,
                reason: format!("Moving to {} is not a downgrade", target.plan),
            }
            .into());
        }
        validate_transition(&account.state, action, Some(target))?;

        let deleted_galleries = if gallery_ids.is_empty() {
            0
        } else {
            let deleted = self
                .ctx
                .galleries
                .delete_galleries(&cmd.user_id, &gallery_ids)
                .await?;
            tracing::info!(
                user_id = %cmd.user_id,
                requested = gallery_ids.len(),
                deleted,
                "Deleted galleries ahead of downgrade"
            );
            deleted
        };

        let change = self
            .change_plan
            .handle(ChangePlanCommand {
                user_id: cmd.user_id,
                plan: cmd.target_plan,
            })
            .await?;

        Ok(DowngradeWithCleanupResult {
            deleted_galleries,
            change,
        })
    }
}
