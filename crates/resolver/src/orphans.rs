//! Whole-store audit for resources that already have no owner.
//!
//! The at-least-one-owner rule is kept by callers, not by the store, so a
//! bad migration or an unguarded revoke can break it. This scan finds the
//! damage.

use keyward_core::error::KeywardResult;
use keyward_core::{PermissionEntry, ResourceId};
use keyward_store::PermissionStore;
use rayon::prelude::*;
use std::collections::HashSet;

/// Resources referenced by `entries` with no `Owner` entry, sorted.
pub fn find_orphaned_resources(entries: &[PermissionEntry]) -> Vec<ResourceId> {
    let owned: HashSet<&ResourceId> = entries
        .par_iter()
        .filter(|e| e.is_owner())
        .map(|e| &e.resource)
        .collect();

    let orphaned: HashSet<&ResourceId> = entries
        .par_iter()
        .map(|e| &e.resource)
        .filter(|r| !owned.contains(r))
        .collect();

    let mut orphaned: Vec<ResourceId> = orphaned.into_iter().cloned().collect();
    orphaned.sort();
    orphaned
}

/// Reads every entry from `store` and scans it.
pub async fn scan<S>(store: &S) -> KeywardResult<Vec<ResourceId>>
where
    S: PermissionStore + ?Sized,
{
    let entries = store.all_entries().await?;
    let orphaned = find_orphaned_resources(&entries);

    if orphaned.is_empty() {
        tracing::info!(entries = entries.len(), "no orphaned resources");
    } else {
        tracing::warn!(
            entries = entries.len(),
            orphaned = orphaned.len(),
            "resources without an owner"
        );
    }
    Ok(orphaned)
}
