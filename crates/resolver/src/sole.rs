//! Sole ownership of shared resources.
//!
//! A resource is sole-owned by a user when the user reaches `Owner` on it
//! through exactly one subject and that subject is the only `Owner` on the
//! resource. Only shared resources (two or more distinct subjects with any
//! access) are reported: these are the ones a revoke, unshare, or
//! leave-group action could strip of their last owner.

use crate::ownership::{owning_paths_in, OwnershipResolver};
use keyward_core::error::KeywardResult;
use keyward_core::{AccessLevel, PermissionEntry, ResourceId, Subject, UserId};
use keyward_store::{OwnershipView, PermissionStore};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Aggregate of every entry on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceProfile {
    /// Distinct subjects holding any level.
    pub subjects: HashSet<Subject>,
    /// Distinct subjects holding `Owner`.
    pub owners: SmallVec<[Subject; 2]>,
}

impl ResourceProfile {
    /// Groups entries by resource.
    pub fn collect(
        entries: impl IntoIterator<Item = PermissionEntry>,
    ) -> HashMap<ResourceId, ResourceProfile> {
        let mut profiles: HashMap<ResourceId, ResourceProfile> = HashMap::new();
        for entry in entries {
            let profile = profiles.entry(entry.resource).or_default();
            if entry.level == AccessLevel::Owner && !profile.owners.contains(&entry.subject) {
                profile.owners.push(entry.subject.clone());
            }
            profile.subjects.insert(entry.subject);
        }
        profiles
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.subjects.len() > 1
    }

    /// `subject` is the one and only owner.
    #[inline]
    pub fn is_sole_owner(&self, subject: &Subject) -> bool {
        self.owners.len() == 1 && &self.owners[0] == subject
    }

    pub fn is_orphaned(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Sole-owned-and-shared predicate for one resource, given the user's
/// owning paths on it.
pub(crate) fn is_sole_owned_shared(via: &[Subject], profile: &ResourceProfile) -> bool {
    match via {
        [path] => profile.is_shared() && profile.is_sole_owner(path),
        _ => false,
    }
}

/// Shared resources the view's subjects reach `Owner` on through exactly one
/// subject that is also the resource's only owner.
///
/// Pure over `view`: run it on a view read inside the transaction that will
/// perform the change it guards.
pub fn sole_owned_shared_in(view: &OwnershipView) -> HashSet<ResourceId> {
    let paths = owning_paths_in(view);
    let profiles = ResourceProfile::collect(view.entries.iter().cloned());

    paths
        .into_iter()
        .filter(|(resource, via)| {
            profiles
                .get(resource)
                .map_or(false, |profile| is_sole_owned_shared(via, profile))
        })
        .map(|(resource, _)| resource)
        .collect()
}

/// Finds shared resources a user is the last owner of.
#[derive(Clone)]
pub struct SoleOwnershipAnalyzer {
    resolver: OwnershipResolver,
}

impl SoleOwnershipAnalyzer {
    pub fn new(resolver: OwnershipResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &OwnershipResolver {
        &self.resolver
    }

    /// Profile of a single resource, read in one lookup.
    pub async fn profile(&self, resource: &ResourceId) -> KeywardResult<ResourceProfile> {
        let entries = self
            .resolver
            .store()
            .entries_by_resource(resource)
            .await?;
        Ok(ResourceProfile::collect(entries)
            .remove(resource)
            .unwrap_or_default())
    }

    /// Shared resources for which `user` is the sole owner.
    ///
    /// With `include_group_ownership` the user's single path may be a group.
    /// A user owning a resource through two paths is never its sole owner.
    pub async fn resolve_sole_owned_shared_resources(
        &self,
        user: &UserId,
        include_group_ownership: bool,
    ) -> KeywardResult<HashSet<ResourceId>> {
        let view = self.resolver.view(user, include_group_ownership).await?;
        let sole = sole_owned_shared_in(&view);

        tracing::info!(
            user = %user,
            include_groups = include_group_ownership,
            sole = sole.len(),
            "resolved sole-owned shared resources"
        );
        Ok(sole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::{GroupId, GroupMembership, PermissionId};
    use keyward_store::MemoryStore;
    use std::sync::Arc;

    fn user(id: &str) -> Subject {
        Subject::User(UserId::new(id).unwrap())
    }

    fn group(id: &str) -> Subject {
        Subject::Group(GroupId::new(id).unwrap())
    }

    fn res(id: &str) -> ResourceId {
        ResourceId::new(id).unwrap()
    }

    fn entry(subject: Subject, resource: &str, level: AccessLevel) -> PermissionEntry {
        PermissionEntry {
            id: PermissionId::new(format!("{}.{resource}", subject.id_str())).unwrap(),
            subject,
            resource: res(resource),
            level,
            created_at: 0,
            modified_at: 0,
        }
    }

    async fn analyzer_with(
        entries: Vec<PermissionEntry>,
        memberships: &[(&str, &str)],
    ) -> SoleOwnershipAnalyzer {
        let store = Arc::new(MemoryStore::new());
        for e in entries {
            store.insert(e).await.unwrap();
        }
        for (g, u) in memberships {
            store
                .add_membership(GroupMembership {
                    group: GroupId::new(*g).unwrap(),
                    user: UserId::new(*u).unwrap(),
                })
                .await;
        }
        SoleOwnershipAnalyzer::new(OwnershipResolver::from_store(store))
    }

    #[test]
    fn profile_counts_distinct_subjects_and_owners() {
        let profiles = ResourceProfile::collect(vec![
            entry(user("a"), "r", AccessLevel::Owner),
            entry(group("g"), "r", AccessLevel::Read),
            entry(user("b"), "s", AccessLevel::Read),
        ]);
        let r = &profiles[&res("r")];
        assert!(r.is_shared());
        assert!(r.is_sole_owner(&user("a")));
        assert!(!r.is_sole_owner(&group("g")));

        let s = &profiles[&res("s")];
        assert!(!s.is_shared());
        assert!(s.is_orphaned());
    }

    #[test]
    fn predicate_rejects_multiple_paths() {
        let profiles = ResourceProfile::collect(vec![
            entry(user("a"), "r", AccessLevel::Owner),
            entry(user("b"), "r", AccessLevel::Read),
        ]);
        let p = &profiles[&res("r")];
        assert!(is_sole_owned_shared(&[user("a")], p));
        assert!(!is_sole_owned_shared(&[user("a"), group("g")], p));
        assert!(!is_sole_owned_shared(&[], p));
    }

    #[test]
    fn sole_owned_in_view() {
        let view = OwnershipView {
            subjects: vec![user("kathleen"), group("ops")],
            members: Default::default(),
            entries: vec![
                entry(user("kathleen"), "mocha", AccessLevel::Owner),
                entry(user("lynne"), "mocha", AccessLevel::Read),
                entry(group("ops"), "enlightenment", AccessLevel::Owner),
                entry(user("kathleen"), "enlightenment", AccessLevel::Owner),
                entry(user("lynne"), "enlightenment", AccessLevel::Read),
                entry(user("kathleen"), "private", AccessLevel::Owner),
            ],
        };
        assert_eq!(sole_owned_shared_in(&view), HashSet::from([res("mocha")]));
        assert!(sole_owned_shared_in(&OwnershipView::default()).is_empty());
    }

    #[tokio::test]
    async fn private_resource_is_never_reported() {
        let analyzer =
            analyzer_with(vec![entry(user("jean"), "mailvelope", AccessLevel::Owner)], &[]).await;
        let jean = UserId::new("jean").unwrap();

        assert!(analyzer
            .resolve_sole_owned_shared_resources(&jean, false)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            analyzer
                .resolver()
                .resolve_owned_resources(&jean, false)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn co_owned_resource_is_not_sole() {
        let analyzer = analyzer_with(
            vec![
                entry(user("ada"), "cakephp", AccessLevel::Owner),
                entry(user("betty"), "cakephp", AccessLevel::Owner),
            ],
            &[],
        )
        .await;

        let sole = analyzer
            .resolve_sole_owned_shared_resources(&UserId::new("ada").unwrap(), true)
            .await
            .unwrap();
        assert!(sole.is_empty());
    }

    #[tokio::test]
    async fn direct_plus_group_path_is_not_sole() {
        let analyzer = analyzer_with(
            vec![
                entry(user("frances"), "gnupg", AccessLevel::Owner),
                entry(group("acct"), "gnupg", AccessLevel::Owner),
            ],
            &[("acct", "frances")],
        )
        .await;
        let frances = UserId::new("frances").unwrap();

        assert!(analyzer
            .resolve_sole_owned_shared_resources(&frances, true)
            .await
            .unwrap()
            .is_empty());
        // Without groups the group is just another owner.
        assert!(analyzer
            .resolve_sole_owned_shared_resources(&frances, false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn two_owning_groups_are_not_sole() {
        let analyzer = analyzer_with(
            vec![
                entry(group("dev"), "docker", AccessLevel::Owner),
                entry(group("qa"), "docker", AccessLevel::Owner),
                entry(user("lynne"), "docker", AccessLevel::Update),
            ],
            &[("dev", "grace"), ("qa", "grace")],
        )
        .await;

        assert!(analyzer
            .resolve_sole_owned_shared_resources(&UserId::new("grace").unwrap(), true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn single_owning_group_is_sole_with_flag_only() {
        let analyzer = analyzer_with(
            vec![
                entry(group("ops"), "enlightenment", AccessLevel::Owner),
                entry(user("lynne"), "enlightenment", AccessLevel::Read),
            ],
            &[("ops", "helen")],
        )
        .await;
        let helen = UserId::new("helen").unwrap();

        assert_eq!(
            analyzer
                .resolve_sole_owned_shared_resources(&helen, true)
                .await
                .unwrap(),
            HashSet::from([res("enlightenment")])
        );
        assert!(analyzer
            .resolve_sole_owned_shared_resources(&helen, false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn profile_of_unknown_resource_is_empty() {
        let analyzer = analyzer_with(vec![], &[]).await;
        let p = analyzer.profile(&res("nothing")).await.unwrap();
        assert!(p.is_orphaned());
        assert!(!p.is_shared());
    }
}
