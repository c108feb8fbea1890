//! Direct and group-inherited ownership.
//!
//! A user acts as a set of subjects: themselves, plus (optionally) every group
//! they belong to. Ownership is read from one [`OwnershipView`] of the store
//! and folded into a single union of the `Owner` entries, so no resource is
//! counted twice and no answer mixes two states of the store.

use keyward_core::error::KeywardResult;
use keyward_core::{ResourceId, Subject, UserId};
use keyward_store::{AclStore, OwnershipView};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// For each owned resource, the user's subjects holding `Owner` on it.
///
/// One path is the common case; two or more means the user owns the
/// resource several ways (directly and through a group, or through two
/// groups).
pub type OwningPaths = HashMap<ResourceId, SmallVec<[Subject; 2]>>;

/// Owning paths of the view's subjects.
pub fn owning_paths_in(view: &OwnershipView) -> OwningPaths {
    let mut paths = OwningPaths::new();
    for entry in view.owning_entries() {
        let via = paths.entry(entry.resource.clone()).or_default();
        if !via.contains(&entry.subject) {
            via.push(entry.subject.clone());
        }
    }
    paths
}

/// Resolves which resources a user owns.
#[derive(Clone)]
pub struct OwnershipResolver {
    store: Arc<dyn AclStore>,
}

impl OwnershipResolver {
    pub fn new(store: Arc<dyn AclStore>) -> Self {
        Self { store }
    }

    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AclStore + 'static,
    {
        Self::new(store)
    }

    pub fn store(&self) -> &Arc<dyn AclStore> {
        &self.store
    }

    /// One consistent read of everything `user`'s ownership depends on.
    pub async fn view(&self, user: &UserId, include_groups: bool) -> KeywardResult<OwnershipView> {
        let view = self.store.ownership_view(user, include_groups).await?;
        tracing::debug!(
            user = %user,
            subjects = view.subjects.len(),
            entries = view.entries.len(),
            "ownership view"
        );
        Ok(view)
    }

    /// Owned resources together with the path(s) through which they are owned.
    pub async fn owning_paths(
        &self,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<OwningPaths> {
        Ok(owning_paths_in(&self.view(user, include_groups).await?))
    }

    /// Resources `user` owns directly, and through groups when
    /// `include_group_ownership` is set. Empty when nothing is owned.
    pub async fn resolve_owned_resources(
        &self,
        user: &UserId,
        include_group_ownership: bool,
    ) -> KeywardResult<HashSet<ResourceId>> {
        let owned: HashSet<ResourceId> = self
            .owning_paths(user, include_group_ownership)
            .await?
            .into_keys()
            .collect();

        tracing::info!(
            user = %user,
            include_groups = include_group_ownership,
            owned = owned.len(),
            "resolved owned resources"
        );
        Ok(owned)
    }
}
