//! Storage abstraction for permission entries and group memberships.
//!
//! The resolver talks to [`AclStore`], which joins the two lookup traits and
//! adds single-state views. Backends:
//! - [`MemoryStore`] -- indexed in-memory snapshot, used by the CLI and tests
//! - `PgStore` -- Postgres tables (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod snapshot;

use async_trait::async_trait;
use keyward_core::error::KeywardResult;
use keyward_core::{
    AccessLevel, GroupId, PermissionEntry, ResourceId, Subject, SubjectKind, UserId,
};
use std::collections::HashSet;

pub use memory::MemoryStore;
pub use snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Filter for [`PermissionStore::query`]. Unset fields match everything.
///
/// `subject` pins both kind and id; `subject_kind` alone narrows to all
/// users or all groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionQuery {
    pub subject: Option<Subject>,
    pub subject_kind: Option<SubjectKind>,
    pub resource: Option<ResourceId>,
    pub level: Option<AccessLevel>,
}

impl PermissionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn subject_kind(mut self, kind: SubjectKind) -> Self {
        self.subject_kind = Some(kind);
        self
    }

    pub fn resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn level(mut self, level: AccessLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn matches(&self, entry: &PermissionEntry) -> bool {
        self.subject.as_ref().map_or(true, |s| &entry.subject == s)
            && self
                .subject_kind
                .map_or(true, |k| entry.subject.kind() == k)
            && self.resource.as_ref().map_or(true, |r| &entry.resource == r)
            && self.level.map_or(true, |l| entry.level == l)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read access to the ACL entries.
///
/// Only [`query`](Self::query) is required. The named lookups have default
/// implementations on top of it; indexed backends override them.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn query(&self, filter: &PermissionQuery) -> KeywardResult<Vec<PermissionEntry>>;

    async fn entries_by_subject(&self, subject: &Subject) -> KeywardResult<Vec<PermissionEntry>> {
        self.query(&PermissionQuery::new().subject(subject.clone()))
            .await
    }

    /// Entries held by any of `subjects`.
    async fn entries_by_subjects(
        &self,
        subjects: &[Subject],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        let mut entries = Vec::new();
        for subject in subjects {
            entries.extend(self.entries_by_subject(subject).await?);
        }
        Ok(entries)
    }

    async fn entries_by_resource(
        &self,
        resource: &ResourceId,
    ) -> KeywardResult<Vec<PermissionEntry>> {
        self.query(&PermissionQuery::new().resource(resource.clone()))
            .await
    }

    /// Entries on any of `resources`.
    async fn entries_by_resources(
        &self,
        resources: &[ResourceId],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        let mut entries = Vec::new();
        for resource in resources {
            entries.extend(self.entries_by_resource(resource).await?);
        }
        Ok(entries)
    }

    /// Entries on `resource` at exactly `level`.
    async fn entries_by_resource_and_level(
        &self,
        resource: &ResourceId,
        level: AccessLevel,
    ) -> KeywardResult<Vec<PermissionEntry>> {
        self.query(
            &PermissionQuery::new()
                .resource(resource.clone())
                .level(level),
        )
        .await
    }

    async fn all_entries(&self) -> KeywardResult<Vec<PermissionEntry>> {
        self.query(&PermissionQuery::new()).await
    }
}

/// Group membership lookups in both directions.
#[async_trait]
pub trait GroupMembershipIndex: Send + Sync {
    async fn groups_of(&self, user: &UserId) -> KeywardResult<HashSet<GroupId>>;

    async fn members_of(&self, group: &GroupId) -> KeywardResult<HashSet<UserId>>;
}

// ---------------------------------------------------------------------------
// Consistent views
// ---------------------------------------------------------------------------

/// Everything needed to judge ownership for a set of subjects, read from one
/// state of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipView {
    /// Subjects the view was taken for.
    pub subjects: Vec<Subject>,
    /// Members of the group when the view was taken for a single group;
    /// empty otherwise.
    pub members: HashSet<UserId>,
    /// Every entry, of any subject, on every resource one of `subjects`
    /// holds `Owner` on.
    pub entries: Vec<PermissionEntry>,
}

impl OwnershipView {
    /// Entries held by the view's subjects at `Owner`.
    pub fn owning_entries(&self) -> impl Iterator<Item = &PermissionEntry> + '_ {
        self.entries
            .iter()
            .filter(|e| e.is_owner() && self.subjects.contains(&e.subject))
    }
}

/// Both halves of the ACL behind one handle.
///
/// The view methods answer from a single state: a resolution built on one
/// view cannot mix data from before and after a concurrent change.
#[async_trait]
pub trait AclStore: PermissionStore + GroupMembershipIndex {
    /// View for `user`, plus their groups when `include_groups` is set. The
    /// membership lookup and the entry lookup see the same state.
    async fn ownership_view(
        &self,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<OwnershipView>;

    /// View for one subject. For a group, `members` is filled from the same
    /// state.
    async fn subject_view(&self, subject: &Subject) -> KeywardResult<OwnershipView>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::PermissionId;

    fn entry(subject: Subject, resource: &str, level: AccessLevel) -> PermissionEntry {
        PermissionEntry {
            id: PermissionId::new(format!("{}-{resource}", subject.id_str())).unwrap(),
            subject,
            resource: ResourceId::new(resource).unwrap(),
            level,
            created_at: 0,
            modified_at: 0,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let e = entry(
            Subject::User(UserId::new("jean").unwrap()),
            "mailvelope",
            AccessLevel::Read,
        );
        assert!(PermissionQuery::new().matches(&e));
    }

    #[test]
    fn filter_fields_combine() {
        let e = entry(
            Subject::Group(GroupId::new("qa").unwrap()),
            "docker",
            AccessLevel::Owner,
        );

        let q = PermissionQuery::new()
            .subject_kind(SubjectKind::Group)
            .level(AccessLevel::Owner);
        assert!(q.matches(&e));

        let q = q.resource(ResourceId::new("composer").unwrap());
        assert!(!q.matches(&e));

        let as_user = PermissionQuery::new().subject(Subject::User(UserId::new("qa").unwrap()));
        assert!(!as_user.matches(&e));
    }
}
