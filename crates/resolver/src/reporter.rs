//! Per-user ownership report.
//!
//! Gathers, for one user, every owned resource with the path(s) it is owned
//! through, whether it is shared, and whether the user is its sole owner.

use crate::ownership::owning_paths_in;
use crate::sole::{is_sole_owned_shared, ResourceProfile, SoleOwnershipAnalyzer};
use keyward_core::error::KeywardResult;
use keyward_core::{ResourceId, Subject, UserId};
use serde::Serialize;
use std::time::{Duration, Instant};

/// One owned resource as seen from the report's user.
#[derive(Debug, Clone, Serialize)]
pub struct OwnedResource {
    pub resource: ResourceId,
    pub via: Vec<Subject>,
    pub shared: bool,
    pub sole_owner: bool,
}

impl OwnedResource {
    /// Owned through a direct user entry (possibly alongside groups).
    pub fn is_direct(&self) -> bool {
        self.via.iter().any(|s| matches!(s, Subject::User(_)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnershipReport {
    pub user: UserId,
    pub include_groups: bool,
    /// Sorted by resource id.
    pub resources: Vec<OwnedResource>,
    pub elapsed: Duration,
}

impl OwnershipReport {
    /// Reads one ownership view for `user` and derives every column from it.
    pub async fn build(
        analyzer: &SoleOwnershipAnalyzer,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<Self> {
        let t0 = Instant::now();
        let view = analyzer.resolver().view(user, include_groups).await?;
        let paths = owning_paths_in(&view);
        let profiles = ResourceProfile::collect(view.entries);

        let mut resources: Vec<OwnedResource> = paths
            .into_iter()
            .map(|(resource, via)| {
                let (shared, sole_owner) = match profiles.get(&resource) {
                    Some(p) => (p.is_shared(), is_sole_owned_shared(&via, p)),
                    None => (false, false),
                };
                OwnedResource {
                    resource,
                    via: via.into_vec(),
                    shared,
                    sole_owner,
                }
            })
            .collect();
        resources.sort_by(|a, b| a.resource.cmp(&b.resource));

        let report = OwnershipReport {
            user: user.clone(),
            include_groups,
            resources,
            elapsed: t0.elapsed(),
        };

        tracing::info!(
            user = %user,
            owned = report.resources.len(),
            sole = report.sole_owned_count(),
            elapsed_ms = report.elapsed.as_millis(),
            "report built"
        );
        Ok(report)
    }

    pub fn direct_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_direct()).count()
    }

    /// Owned only through groups.
    pub fn inherited_only_count(&self) -> usize {
        self.resources.len() - self.direct_count()
    }

    pub fn sole_owned_count(&self) -> usize {
        self.resources.iter().filter(|r| r.sole_owner).count()
    }

    /// Render the report as a framed text block.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                   KEYWARD OWNERSHIP REPORT                   ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!("║  User:               {:>39} ║\n", self.user.as_str()));
        out.push_str(&format!(
            "║  Group ownership:    {:>39} ║\n",
            if self.include_groups { "included" } else { "ignored" }
        ));
        out.push_str(&format!(
            "║  Owned resources:    {:>39} ║\n",
            self.resources.len()
        ));
        out.push_str(&format!(
            "║  Owned directly:     {:>39} ║\n",
            self.direct_count()
        ));
        out.push_str(&format!(
            "║  Via groups only:    {:>39} ║\n",
            self.inherited_only_count()
        ));
        out.push_str(&format!(
            "║  Sole owner, shared: {:>39} ║\n",
            self.sole_owned_count()
        ));
        out.push_str(&format!("║  Elapsed:            {:>36?} ║\n", self.elapsed));
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        if self.resources.is_empty() {
            out.push_str("║  Owns nothing.                                               ║\n");
        } else {
            for (i, r) in self.resources.iter().enumerate() {
                let via: Vec<String> = r.via.iter().map(ToString::to_string).collect();
                let flag = match (r.sole_owner, r.shared) {
                    (true, _) => "LAST OWNER",
                    (false, true) => "shared",
                    (false, false) => "private",
                };
                out.push_str(&format!(
                    "║  {}. {} [{}]\n",
                    i + 1,
                    r.resource,
                    flag
                ));
                out.push_str(&format!("║     via {}\n", via.join(", ")));
            }
        }

        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::OwnershipResolver;
    use keyward_store::{MemoryStore, Snapshot};
    use std::sync::Arc;

    fn analyzer() -> SoleOwnershipAnalyzer {
        let store = Arc::new(MemoryStore::from_snapshot(&Snapshot::demo()).unwrap());
        SoleOwnershipAnalyzer::new(OwnershipResolver::from_store(store))
    }

    #[tokio::test]
    async fn kathleen_with_groups() {
        let user = UserId::new("kathleen").unwrap();
        let report = OwnershipReport::build(&analyzer(), &user, true)
            .await
            .unwrap();

        let ids: Vec<&str> = report.resources.iter().map(|r| r.resource.as_str()).collect();
        assert_eq!(ids, vec!["enlightenment", "mocha"]);
        assert_eq!(report.direct_count(), 1);
        assert_eq!(report.inherited_only_count(), 1);
        // Both are shared and owned through a single path.
        assert_eq!(report.sole_owned_count(), 2);

        let text = report.render();
        assert!(text.contains("kathleen"));
        assert!(text.contains("via group:operations"));
        assert!(text.contains("LAST OWNER"));
    }

    #[tokio::test]
    async fn frances_two_paths_not_sole() {
        let user = UserId::new("frances").unwrap();
        let report = OwnershipReport::build(&analyzer(), &user, true)
            .await
            .unwrap();

        assert_eq!(report.resources.len(), 1);
        let gnupg = &report.resources[0];
        assert_eq!(gnupg.via.len(), 2);
        assert!(gnupg.shared);
        assert!(!gnupg.sole_owner);
    }

    #[tokio::test]
    async fn empty_report_renders() {
        let user = UserId::new("irene").unwrap();
        let report = OwnershipReport::build(&analyzer(), &user, true)
            .await
            .unwrap();
        assert!(report.resources.is_empty());
        assert!(report.render().contains("Owns nothing."));
    }
}
