//! Post-commit effect execution.

use std::sync::Arc;

use crate::domain::billing::BillingEffect;
use crate::ports::{AuditLog, BillingMailer, RefundDesk};

/// Executes effects after a transition has been committed.
///
/// Every effect is attempted; a failure is logged and never reaches the caller.
pub struct EffectDispatcher {
    audit: Arc<dyn AuditLog>,
    mailer: Arc<dyn BillingMailer>,
    refunds: Arc<dyn RefundDesk>,
}

impl EffectDispatcher {
    pub fn new(
        audit: Arc<dyn AuditLog>,
        mailer: Arc<dyn BillingMailer>,
        refunds: Arc<dyn RefundDesk>,
    ) -> Self {
        Self {
            audit,
            mailer,
            refunds,
        }
    }

    /// Runs `effects` in order. Returns how many failed.
    pub async fn dispatch(&self, effects: &[BillingEffect]) -> usize {
        let mut failures = 0;
        for effect in effects {
            let result = match effect {
                BillingEffect::Audit(entry) => self.audit.record(entry).await,
                BillingEffect::Email(notice) => self.mailer.send(notice).await,
                BillingEffect::CancelPendingRefunds { user_id } => {
                    self.refunds.cancel_pending_refunds(user_id).await.map(|count| {
                        if count > 0 {
                            tracing::info!(user_id = %user_id, count, "Withdrew pending refunds");
                        }
                    })
                }
            };

            if let Err(err) = result {
                failures += 1;
                tracing::warn!(effect = effect.label(), error = %err, "Post-commit effect failed");
            }
        }
        failures
    }
}
