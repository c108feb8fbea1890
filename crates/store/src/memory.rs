//! Indexed in-memory store.
//!
//! Holds entries keyed by subject, with a secondary resource index, and both
//! directions of the membership relation. Each lookup takes one read lock, so
//! a single call always sees a consistent state.
//!
//! The mutators exist for loading fixtures and staging test scenarios; the
//! resolver never calls them.

use crate::snapshot::Snapshot;
use crate::{AclStore, GroupMembershipIndex, OwnershipView, PermissionQuery, PermissionStore};
use async_trait::async_trait;
use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::{
    AccessLevel, GroupId, GroupMembership, PermissionEntry, ResourceId, Subject, UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    by_subject: HashMap<Subject, BTreeMap<ResourceId, PermissionEntry>>,
    by_resource: HashMap<ResourceId, BTreeSet<Subject>>,
    groups_by_user: HashMap<UserId, HashSet<GroupId>>,
    users_by_group: HashMap<GroupId, HashSet<UserId>>,
}

impl Inner {
    fn entry(&self, subject: &Subject, resource: &ResourceId) -> Option<&PermissionEntry> {
        self.by_subject.get(subject)?.get(resource)
    }

    fn entries_on<'a>(
        &'a self,
        resource: &'a ResourceId,
    ) -> impl Iterator<Item = &'a PermissionEntry> + 'a {
        self.by_resource
            .get(resource)
            .into_iter()
            .flatten()
            .filter_map(move |s| self.entry(s, resource))
    }

    fn insert(&mut self, entry: PermissionEntry) -> KeywardResult<()> {
        if self.entry(&entry.subject, &entry.resource).is_some() {
            return Err(KeywardError::InvalidArgument(format!(
                "{} already holds an entry on {}",
                entry.subject, entry.resource
            )));
        }
        self.by_resource
            .entry(entry.resource.clone())
            .or_default()
            .insert(entry.subject.clone());
        self.by_subject
            .entry(entry.subject.clone())
            .or_default()
            .insert(entry.resource.clone(), entry);
        Ok(())
    }

    fn view(&self, subjects: Vec<Subject>, members: HashSet<UserId>) -> OwnershipView {
        let owned: BTreeSet<&ResourceId> = subjects
            .iter()
            .filter_map(|s| self.by_subject.get(s))
            .flat_map(|m| m.values())
            .filter(|e| e.is_owner())
            .map(|e| &e.resource)
            .collect();
        let entries = owned
            .into_iter()
            .flat_map(|r| self.entries_on(r))
            .cloned()
            .collect();

        OwnershipView {
            subjects,
            members,
            entries,
        }
    }

    fn add_membership(&mut self, m: GroupMembership) {
        self.groups_by_user
            .entry(m.user.clone())
            .or_default()
            .insert(m.group.clone());
        self.users_by_group.entry(m.group).or_default().insert(m.user);
    }
}

/// In-memory [`PermissionStore`] and [`GroupMembershipIndex`].
pub struct MemoryStore {
    inner: RwLock<Inner>,
    online: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Builds a store from a validated snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> KeywardResult<Self> {
        snapshot.validate()?;

        let mut inner = Inner::default();
        for entry in &snapshot.permissions {
            inner.insert(entry.clone())?;
        }
        for m in &snapshot.memberships {
            inner.add_membership(m.clone());
        }

        tracing::debug!(
            entries = snapshot.permissions.len(),
            memberships = snapshot.memberships.len(),
            "memory store ready"
        );

        Ok(Self {
            inner: RwLock::new(inner),
            online: AtomicBool::new(true),
        })
    }

    /// Makes every lookup fail with `StorageUnavailable` until
    /// [`bring_online`](Self::bring_online) is called.
    pub fn take_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn bring_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> KeywardResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KeywardError::StorageUnavailable(
                "memory store is offline".into(),
            ))
        }
    }

    // -----------------------------------------------------------------------
    // Fixture mutators
    // -----------------------------------------------------------------------

    /// Adds an entry. Fails if the subject already holds one on the resource.
    pub async fn insert(&self, entry: PermissionEntry) -> KeywardResult<()> {
        self.inner.write().await.insert(entry)
    }

    /// Removes the subject's entry on `resource`, returning it if present.
    pub async fn remove(
        &self,
        subject: &Subject,
        resource: &ResourceId,
    ) -> Option<PermissionEntry> {
        let mut inner = self.inner.write().await;
        let removed = inner.by_subject.get_mut(subject)?.remove(resource)?;
        if let Some(subjects) = inner.by_resource.get_mut(resource) {
            subjects.remove(subject);
            if subjects.is_empty() {
                inner.by_resource.remove(resource);
            }
        }
        Some(removed)
    }

    /// Changes the level of an existing entry.
    pub async fn set_level(
        &self,
        subject: &Subject,
        resource: &ResourceId,
        level: AccessLevel,
        modified_at: u64,
    ) -> KeywardResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .by_subject
            .get_mut(subject)
            .and_then(|m| m.get_mut(resource))
            .ok_or_else(|| {
                KeywardError::InvalidArgument(format!("{subject} has no entry on {resource}"))
            })?;
        entry.level = level;
        entry.modified_at = modified_at;
        Ok(())
    }

    pub async fn add_membership(&self, membership: GroupMembership) {
        self.inner.write().await.add_membership(membership);
    }

    /// Returns `true` if the membership existed.
    pub async fn remove_membership(&self, group: &GroupId, user: &UserId) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .groups_by_user
            .get_mut(user)
            .map_or(false, |groups| groups.remove(group));
        if let Some(users) = inner.users_by_group.get_mut(group) {
            users.remove(user);
        }
        removed
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn query(&self, filter: &PermissionQuery) -> KeywardResult<Vec<PermissionEntry>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        let entries: Vec<PermissionEntry> = match (&filter.subject, &filter.resource) {
            (Some(subject), _) => inner
                .by_subject
                .get(subject)
                .into_iter()
                .flat_map(|m| m.values())
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            (None, Some(resource)) => inner
                .entries_on(resource)
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            (None, None) => inner
                .by_subject
                .values()
                .flat_map(|m| m.values())
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
        };

        tracing::debug!(?filter, hits = entries.len(), "memory query");
        Ok(entries)
    }

    async fn entries_by_subjects(
        &self,
        subjects: &[Subject],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        Ok(subjects
            .iter()
            .filter_map(|s| inner.by_subject.get(s))
            .flat_map(|m| m.values().cloned())
            .collect())
    }

    async fn entries_by_resources(
        &self,
        resources: &[ResourceId],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        Ok(resources
            .iter()
            .flat_map(|r| inner.entries_on(r).cloned().collect::<Vec<_>>())
            .collect())
    }
}

#[async_trait]
impl GroupMembershipIndex for MemoryStore {
    async fn groups_of(&self, user: &UserId) -> KeywardResult<HashSet<GroupId>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;
        Ok(inner.groups_by_user.get(user).cloned().unwrap_or_default())
    }

    async fn members_of(&self, group: &GroupId) -> KeywardResult<HashSet<UserId>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;
        Ok(inner.users_by_group.get(group).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AclStore for MemoryStore {
    async fn ownership_view(
        &self,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<OwnershipView> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        let mut subjects = vec![Subject::User(user.clone())];
        if include_groups {
            if let Some(groups) = inner.groups_by_user.get(user) {
                subjects.extend(groups.iter().cloned().map(Subject::Group));
            }
        }
        let view = inner.view(subjects, HashSet::new());

        tracing::debug!(user = %user, include_groups, entries = view.entries.len(), "memory view");
        Ok(view)
    }

    async fn subject_view(&self, subject: &Subject) -> KeywardResult<OwnershipView> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        let members = match subject {
            Subject::Group(group) => inner.users_by_group.get(group).cloned().unwrap_or_default(),
            Subject::User(_) => HashSet::new(),
        };
        Ok(inner.view(vec![subject.clone()], members))
    }
}
