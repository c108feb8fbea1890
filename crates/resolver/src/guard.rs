//! Last-owner checks consulted before a destructive ACL change.
//!
//! Every check is one read of the store. The caller must run it and the
//! mutation it guards in one transaction, or under a lock on the affected
//! resources; otherwise two concurrent revocations can each see "another
//! owner remains" and together orphan the resource. For Postgres, read the
//! view on the mutating transaction and decide with [`orphaned_without`] or
//! [`crate::sole::sole_owned_shared_in`].

use crate::sole::{ResourceProfile, SoleOwnershipAnalyzer};
use keyward_core::error::KeywardResult;
use keyward_core::{GroupId, ResourceId, Subject, UserId};
use keyward_store::{AclStore, OwnershipView};
use serde::Serialize;

/// Resources in `view` for which `subject` is the only owner, sorted.
/// Removing `subject` would orphan them.
pub fn orphaned_without(subject: &Subject, view: &OwnershipView) -> Vec<ResourceId> {
    let mut orphaned: Vec<ResourceId> = ResourceProfile::collect(view.entries.iter().cloned())
        .into_iter()
        .filter(|(_, profile)| profile.is_sole_owner(subject))
        .map(|(resource, _)| resource)
        .collect();
    orphaned.sort();
    orphaned
}

/// Outcome of [`LastOwnerGuard::check_revoke`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    Allowed,
    /// Revoking would leave `resource` without an owner.
    Blocked { resource: ResourceId },
}

impl GuardVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardVerdict::Blocked { .. })
    }
}

pub struct LastOwnerGuard {
    analyzer: SoleOwnershipAnalyzer,
}

impl LastOwnerGuard {
    pub fn new(analyzer: SoleOwnershipAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Would removing `subject`'s entry on `resource` orphan it?
    pub async fn check_revoke(
        &self,
        subject: &Subject,
        resource: &ResourceId,
    ) -> KeywardResult<GuardVerdict> {
        let profile = self.analyzer.profile(resource).await?;

        if profile.is_sole_owner(subject) {
            tracing::warn!(%subject, %resource, "revoke blocked: last owner");
            return Ok(GuardVerdict::Blocked {
                resource: resource.clone(),
            });
        }
        Ok(GuardVerdict::Allowed)
    }

    /// Resources that deleting `group` would orphan, sorted.
    pub async fn check_group_deletion(&self, group: &GroupId) -> KeywardResult<Vec<ResourceId>> {
        let subject = Subject::Group(group.clone());
        let view = self.analyzer.resolver().store().subject_view(&subject).await?;
        let blocked = orphaned_without(&subject, &view);

        if !blocked.is_empty() {
            tracing::warn!(%group, blocked = blocked.len(), "group deletion would orphan resources");
        }
        Ok(blocked)
    }

    /// Resources that removing `user` from `group` would leave without a
    /// reachable owner: only when `user` is the group's last member, the
    /// group's sole-owned resources.
    pub async fn check_membership_removal(
        &self,
        group: &GroupId,
        user: &UserId,
    ) -> KeywardResult<Vec<ResourceId>> {
        let subject = Subject::Group(group.clone());
        let view = self.analyzer.resolver().store().subject_view(&subject).await?;

        if view.members.len() != 1 || !view.members.contains(user) {
            return Ok(Vec::new());
        }
        let blocked = orphaned_without(&subject, &view);

        if !blocked.is_empty() {
            tracing::warn!(%group, %user, blocked = blocked.len(), "last member leaving would orphan resources");
        }
        Ok(blocked)
    }

    /// Shared resources `user` directly sole-owns, sorted. Their private
    /// resources go away with them and do not block.
    pub async fn check_user_deletion(&self, user: &UserId) -> KeywardResult<Vec<ResourceId>> {
        let mut blocked: Vec<ResourceId> = self
            .analyzer
            .resolve_sole_owned_shared_resources(user, false)
            .await?
            .into_iter()
            .collect();
        blocked.sort();

        if !blocked.is_empty() {
            tracing::warn!(%user, blocked = blocked.len(), "user deletion would orphan resources");
        }
        Ok(blocked)
    }
}
