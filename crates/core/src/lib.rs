//! Domain models, shared types, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod error;
pub mod types;

pub use error::{KeywardError, KeywardResult};
pub use types::{
    AccessLevel, GroupId, GroupMembership, PermissionEntry, PermissionId, ResourceId, Subject,
    SubjectKind, UserId,
};
