//! Ownership resolution, sole-owner analysis, last-owner guards, reports, and sinks.

pub mod guard;
pub mod orphans;
pub mod ownership;
pub mod reporter;
pub mod sink;
pub mod sole;

pub use guard::{orphaned_without, GuardVerdict, LastOwnerGuard};
pub use orphans::find_orphaned_resources;
pub use ownership::{owning_paths_in, OwnershipResolver, OwningPaths};
pub use sole::{sole_owned_shared_in, ResourceProfile, SoleOwnershipAnalyzer};
