//! In-memory adapters.
//!
//! Deterministic implementations of the storage and collaborator ports used by
//! tests and by the development server when no database is configured. State
//! lives behind std mutexes; nothing is persisted.

mod collaborators;
mod notifier;
mod stores;

pub use collaborators::InMemoryCollaborators;
pub use notifier::RecordingNotifier;
pub use stores::{
    InMemoryBillingRecordRepository, InMemorySubscriptionRepository, InMemoryUserDirectory,
    InMemoryWebhookEventRepository,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
