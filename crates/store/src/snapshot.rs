//! JSON snapshots of users, groups, memberships, and permission entries.
//!
//! A snapshot is the on-disk form consumed by [`MemoryStore`](crate::MemoryStore)
//! and the CLI. A small demo snapshot ships with the crate.

use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::{GroupId, GroupMembership, PermissionEntry, ResourceId, Subject, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

const DEMO_JSON: &str = include_str!("../fixtures/demo.json");

static DEMO: LazyLock<Snapshot> = LazyLock::new(|| {
    Snapshot::from_json(DEMO_JSON).expect("bundled demo snapshot is valid")
});

/// Everything a store holds, in plain serializable form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub groups: Vec<GroupId>,
    #[serde(default)]
    pub memberships: Vec<GroupMembership>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

impl Snapshot {
    /// Parses and validates a snapshot.
    pub fn from_json(raw: &str) -> KeywardResult<Self> {
        let snapshot: Snapshot = serde_json::from_str(raw)
            .map_err(|e| KeywardError::InvalidArgument(format!("malformed snapshot: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reads a snapshot file. An unreadable file is reported as an
    /// unavailable store.
    pub fn from_path(path: &Path) -> KeywardResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KeywardError::StorageUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let snapshot = Self::from_json(&raw)?;

        tracing::info!(
            path = %path.display(),
            users = snapshot.users.len(),
            groups = snapshot.groups.len(),
            permissions = snapshot.permissions.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    /// The bundled demo data set.
    pub fn demo() -> Self {
        DEMO.clone()
    }

    /// Checks referential integrity and `(subject, resource)` uniqueness.
    pub fn validate(&self) -> KeywardResult<()> {
        let users: HashSet<&UserId> = self.users.iter().collect();
        let groups: HashSet<&GroupId> = self.groups.iter().collect();

        for m in &self.memberships {
            if !groups.contains(&m.group) {
                return Err(KeywardError::InvalidArgument(format!(
                    "membership references unknown group {}",
                    m.group
                )));
            }
            if !users.contains(&m.user) {
                return Err(KeywardError::InvalidArgument(format!(
                    "membership references unknown user {}",
                    m.user
                )));
            }
        }

        let mut ids = HashSet::new();
        let mut pairs: HashSet<(&Subject, &ResourceId)> = HashSet::new();
        for e in &self.permissions {
            let known = match &e.subject {
                Subject::User(u) => users.contains(u),
                Subject::Group(g) => groups.contains(g),
            };
            if !known {
                return Err(KeywardError::InvalidArgument(format!(
                    "permission {} references unknown {}",
                    e.id, e.subject
                )));
            }
            if !ids.insert(&e.id) {
                return Err(KeywardError::InvalidArgument(format!(
                    "duplicate permission id {}",
                    e.id
                )));
            }
            if !pairs.insert((&e.subject, &e.resource)) {
                return Err(KeywardError::InvalidArgument(format!(
                    "{} holds more than one entry on {}",
                    e.subject, e.resource
                )));
            }
        }

        Ok(())
    }
}
