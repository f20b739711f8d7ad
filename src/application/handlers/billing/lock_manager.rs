//! Per-subscription change lock.
//!
//! The lock is a persisted boolean flipped with a conditional write. Acquiring
//! never waits: a held lock is reported to the caller as `PROCESSING_CHANGE`.
//! There is no expiry, so a process killed inside a critical section leaves the
//! flag set until an operator clears it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::domain::billing::{BillingError, SubscriptionRecord};
use crate::domain::foundation::SubscriptionId;
use crate::ports::SubscriptionRepository;

/// Runs critical sections while holding a subscription's change lock.
#[derive(Clone)]
pub struct ChangeLock {
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl ChangeLock {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self { subscriptions }
    }

    /// Acquires the lock, hands the freshly read record to `critical`, and
    /// releases the lock on every exit, including a panic inside `critical`.
    ///
    /// # Errors
    ///
    /// - `ProcessingChange` if another change holds the lock
    /// - whatever `critical` returns
    pub async fn run_locked<T, F, Fut>(
        &self,
        subscription_id: &SubscriptionId,
        critical: F,
    ) -> Result<T, BillingError>
    where
        F: FnOnce(SubscriptionRecord) -> Fut,
        Fut: Future<Output = Result<T, BillingError>>,
    {
        if !self.subscriptions.try_acquire_change_lock(subscription_id).await? {
            tracing::info!(
                subscription_id = %subscription_id,
                "Plan change rejected: change already in progress"
            );
            return Err(BillingError::ProcessingChange(*subscription_id));
        }

        let outcome = AssertUnwindSafe(async {
            let record = self
                .subscriptions
                .find_by_id(subscription_id)
                .await?
                .ok_or_else(|| {
                    BillingError::infrastructure(format!(
                        "Subscription {} vanished while locked",
                        subscription_id
                    ))
                })?;
            critical(record).await
        })
        .catch_unwind()
        .await;

        if let Err(err) = self.subscriptions.release_change_lock(subscription_id).await {
            tracing::error!(
                subscription_id = %subscription_id,
                error = %err,
                "Failed to release change lock"
            );
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::domain::billing::test_support::active_record;
    use crate::domain::billing::PlanId;

    async fn setup() -> (Arc<InMemorySubscriptionRepository>, ChangeLock, SubscriptionRecord) {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let record = active_record("u1", PlanId::Plus);
        repo.insert(&record).await.unwrap();
        let lock = ChangeLock::new(repo.clone());
        (repo, lock, record)
    }

    async fn is_locked(repo: &InMemorySubscriptionRepository, id: &SubscriptionId) -> bool {
        repo.find_by_id(id).await.unwrap().unwrap().processing_change
    }

    #[tokio::test]
    async fn critical_section_sees_lock_held() {
        let (repo, lock, record) = setup().await;

        let held = lock
            .run_locked(&record.id, |fresh| async move { Ok(fresh.processing_change) })
            .await
            .unwrap();

        assert!(held);
        assert!(!is_locked(&repo, &record.id).await);
    }

    #[tokio::test]
    async fn lock_released_after_error() {
        let (repo, lock, record) = setup().await;

        let result: Result<(), _> = lock
            .run_locked(&record.id, |_| async {
                Err(BillingError::infrastructure("boom"))
            })
            .await;

        assert!(result.is_err());
        assert!(!is_locked(&repo, &record.id).await);
    }

    #[tokio::test]
    async fn lock_released_after_panic() {
        let (repo, lock, record) = setup().await;

        let task = {
            let lock = lock.clone();
            let id = record.id;
            tokio::spawn(async move {
                lock.run_locked(&id, |_| async {
                    if id.as_uuid().is_nil() {
                        return Ok(());
                    }
                    panic!("critical section blew up")
                })
                .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!is_locked(&repo, &record.id).await);
    }

    #[tokio::test]
    async fn held_lock_is_reported_without_waiting() {
        let (repo, lock, record) = setup().await;
        repo.try_acquire_change_lock(&record.id).await.unwrap();

        let err = lock
            .run_locked(&record.id, |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PROCESSING_CHANGE");
        // The other holder still owns it.
        assert!(is_locked(&repo, &record.id).await);
    }
}
