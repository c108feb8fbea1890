//! Domain types for the keyward ownership resolver.

use crate::error::{KeywardError, KeywardResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Longest identifier accepted, in bytes.
pub const MAX_ID_LEN: usize = 255;

fn validate_id(what: &str, raw: &str) -> KeywardResult<()> {
    if raw.is_empty() {
        return Err(KeywardError::InvalidArgument(format!(
            "{what} id must not be empty"
        )));
    }
    if raw.len() > MAX_ID_LEN {
        return Err(KeywardError::InvalidArgument(format!(
            "{what} id exceeds {MAX_ID_LEN} bytes"
        )));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(KeywardError::InvalidArgument(format!(
            "{what} id {raw:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Declares an opaque, validated string identifier.
///
/// Each id kind is its own type, so a `UserId` can never be compared against
/// a `GroupId` by accident.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps a raw identifier.
            pub fn new(raw: impl Into<String>) -> KeywardResult<Self> {
                let raw = raw.into();
                validate_id($what, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = KeywardError;

            fn try_from(raw: String) -> KeywardResult<Self> {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = KeywardError;

            fn from_str(raw: &str) -> KeywardResult<Self> {
                Self::new(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// A platform user.
    UserId,
    "user"
);
opaque_id!(
    /// A group of users. Groups can hold permission entries like users do.
    GroupId,
    "group"
);
opaque_id!(
    /// A protected object, typically a stored credential.
    ResourceId,
    "resource"
);
opaque_id!(PermissionId, "permission");

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// Discriminant of a [`Subject`], as stored in the `aro` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = KeywardError;

    fn from_str(raw: &str) -> KeywardResult<Self> {
        match raw {
            "User" => Ok(SubjectKind::User),
            "Group" => Ok(SubjectKind::Group),
            other => Err(KeywardError::InvalidArgument(format!(
                "unknown subject kind {other:?}"
            ))),
        }
    }
}

/// The holder of a permission entry: a single user or a whole group.
///
/// Serialized as `{"type": "user", "id": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Subject {
    User(UserId),
    Group(GroupId),
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Group(_) => SubjectKind::Group,
        }
    }

    /// Raw id, without the kind. Only meaningful together with [`Subject::kind`].
    pub fn id_str(&self) -> &str {
        match self {
            Subject::User(id) => id.as_str(),
            Subject::Group(id) => id.as_str(),
        }
    }

    /// Rebuilds a subject from its stored `(kind, id)` pair.
    pub fn from_parts(kind: SubjectKind, id: impl Into<String>) -> KeywardResult<Self> {
        Ok(match kind {
            SubjectKind::User => Subject::User(UserId::new(id)?),
            SubjectKind::Group => Subject::Group(GroupId::new(id)?),
        })
    }
}

impl From<UserId> for Subject {
    fn from(id: UserId) -> Self {
        Subject::User(id)
    }
}

impl From<GroupId> for Subject {
    fn from(id: GroupId) -> Self {
        Subject::Group(id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{id}"),
            Subject::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Parses the `user:<id>` / `group:<id>` form produced by `Display`.
impl FromStr for Subject {
    type Err = KeywardError;

    fn from_str(raw: &str) -> KeywardResult<Self> {
        match raw.split_once(':') {
            Some(("user", id)) => Ok(Subject::User(UserId::new(id)?)),
            Some(("group", id)) => Ok(Subject::Group(GroupId::new(id)?)),
            _ => Err(KeywardError::InvalidArgument(format!(
                "expected user:<id> or group:<id>, got {raw:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Access levels
// ---------------------------------------------------------------------------

/// Access granted by an entry.
///
/// Ordered `Read < Update < Owner`. The discriminants are the values kept in
/// the relational `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read = 1,
    Update = 7,
    Owner = 15,
}

impl AccessLevel {
    pub const fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> KeywardResult<Self> {
        match code {
            1 => Ok(AccessLevel::Read),
            7 => Ok(AccessLevel::Update),
            15 => Ok(AccessLevel::Owner),
            other => Err(KeywardError::Internal(format!(
                "unknown access level code {other}"
            ))),
        }
    }
}

impl PartialOrd for AccessLevel {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessLevel {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.code().cmp(&other.code())
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessLevel::Read => "read",
            AccessLevel::Update => "update",
            AccessLevel::Owner => "owner",
        })
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One ACL row: `subject` holds `level` on `resource`.
///
/// `(subject, resource)` is unique across a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub id: PermissionId,
    pub subject: Subject,
    pub resource: ResourceId,
    pub level: AccessLevel,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub modified_at: u64,
}

impl PermissionEntry {
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.level == AccessLevel::Owner
    }
}

/// A user belonging to a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group: GroupId,
    pub user: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            UserId::new(""),
            Err(KeywardError::InvalidArgument(_))
        ));
        assert!(matches!(
            GroupId::new("two words"),
            Err(KeywardError::InvalidArgument(_))
        ));
        assert!(ResourceId::new("x".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(ResourceId::new("tab\there").is_err());
    }

    #[test]
    fn accepts_uuid_like_ids() {
        let id: UserId = "8ed1d9e1-8b4c-5c85-9b05-f39a1d2c3e4f".parse().unwrap();
        assert_eq!(id.as_str(), "8ed1d9e1-8b4c-5c85-9b05-f39a1d2c3e4f");
    }

    #[test]
    fn level_ordering() {
        assert!(AccessLevel::Read < AccessLevel::Update);
        assert!(AccessLevel::Update < AccessLevel::Owner);
        assert_eq!(AccessLevel::from_code(15).unwrap(), AccessLevel::Owner);
        assert!(AccessLevel::from_code(3).is_err());
    }

    #[test]
    fn subject_json_shape() {
        let s = Subject::Group(GroupId::new("leadership_team").unwrap());
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"type":"group","id":"leadership_team"}"#);

        let back: Subject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.kind(), SubjectKind::Group);
    }

    #[test]
    fn deserializing_validates_ids() {
        let bad = r#"{"type":"user","id":""}"#;
        assert!(serde_json::from_str::<Subject>(bad).is_err());
    }

    #[test]
    fn user_and_group_with_same_raw_id_differ() {
        let u = Subject::User(UserId::new("ops").unwrap());
        let g = Subject::Group(GroupId::new("ops").unwrap());
        assert_ne!(u, g);
        assert_eq!(u.id_str(), g.id_str());
    }

    #[test]
    fn subject_from_parts() {
        let s = Subject::from_parts("User".parse().unwrap(), "jean").unwrap();
        assert_eq!(s, Subject::User(UserId::new("jean").unwrap()));
        assert!("Robot".parse::<SubjectKind>().is_err());
    }

    #[test]
    fn subject_display_parses_back() {
        let s: Subject = "group:leadership_team".parse().unwrap();
        assert_eq!(s.to_string(), "group:leadership_team");
        assert!("leadership_team".parse::<Subject>().is_err());
        assert!("user:".parse::<Subject>().is_err());
    }
}
