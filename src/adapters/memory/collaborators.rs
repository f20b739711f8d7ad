//! In-memory gallery, usage and refund collaborators.
//!
//! Usage is derived from the galleries registered here, so deleting galleries
//! through `GalleryCleaner` changes what `UsageEvaluator` reports.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::domain::billing::UsageSnapshot;
use crate::domain::foundation::{DomainError, GalleryId, UserId};
use crate::ports::{GalleryCleaner, RefundDesk, UsageEvaluator};

#[derive(Debug, Clone)]
struct StoredGallery {
    id: GalleryId,
    storage_bytes: u64,
}

#[derive(Default)]
struct CollaboratorState {
    galleries: HashMap<UserId, Vec<StoredGallery>>,
    custom_domains: HashSet<UserId>,
    pending_refunds: HashMap<UserId, u32>,
    withdrawn_refunds: HashMap<UserId, u32>,
}

/// Galleries, custom domains and refund requests kept in memory.
#[derive(Default)]
pub struct InMemoryCollaborators {
    state: Mutex<CollaboratorState>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gallery(&self, user_id: &UserId, gallery_id: &GalleryId, storage_bytes: u64) {
        lock(&self.state)
            .galleries
            .entry(user_id.clone())
            .or_default()
            .push(StoredGallery {
                id: gallery_id.clone(),
                storage_bytes,
            });
    }

    pub fn set_custom_domain(&self, user_id: &UserId, in_use: bool) {
        let mut state = lock(&self.state);
        if in_use {
            state.custom_domains.insert(user_id.clone());
        } else {
            state.custom_domains.remove(user_id);
        }
    }

    /// Opens `count` refund requests for the user.
    pub fn open_refunds(&self, user_id: &UserId, count: u32) {
        *lock(&self.state)
            .pending_refunds
            .entry(user_id.clone())
            .or_default() += count;
    }

    /// Refund requests withdrawn so far.
    pub fn withdrawn_refunds(&self, user_id: &UserId) -> u32 {
        lock(&self.state)
            .withdrawn_refunds
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn gallery_ids(&self, user_id: &UserId) -> Vec<GalleryId> {
        lock(&self.state)
            .galleries
            .get(user_id)
            .map(|gs| gs.iter().map(|g| g.id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageEvaluator for InMemoryCollaborators {
    async fn usage_for(&self, user_id: &UserId) -> Result<UsageSnapshot, DomainError> {
        let state = lock(&self.state);
        let galleries = state.galleries.get(user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(UsageSnapshot {
            storage_bytes: galleries.iter().map(|g| g.storage_bytes).sum(),
            gallery_count: galleries.len() as u32,
            custom_domain_in_use: state.custom_domains.contains(user_id),
        })
    }
}

#[async_trait]
impl GalleryCleaner for InMemoryCollaborators {
    async fn delete_galleries(
        &self,
        user_id: &UserId,
        gallery_ids: &[GalleryId],
    ) -> Result<u32, DomainError> {
        let mut state = lock(&self.state);
        let Some(galleries) = state.galleries.get_mut(user_id) else {
            return Ok(0);
        };
        let before = galleries.len();
        galleries.retain(|g| !gallery_ids.contains(&g.id));
        Ok((before - galleries.len()) as u32)
    }
}

#[async_trait]
impl RefundDesk for InMemoryCollaborators {
    async fn has_pending_refund(&self, user_id: &UserId) -> Result<bool, DomainError> {
        Ok(lock(&self.state)
            .pending_refunds
            .get(user_id)
            .is_some_and(|count| *count > 0))
    }

    async fn cancel_pending_refunds(&self, user_id: &UserId) -> Result<u32, DomainError> {
        let mut state = lock(&self.state);
        let withdrawn = state.pending_refunds.remove(user_id).unwrap_or_default();
        *state.withdrawn_refunds.entry(user_id.clone()).or_default() += withdrawn;
        Ok(withdrawn)
    }
}
