//! Postgres backend over the `permissions` and `groups_users` tables.
//!
//! Expected columns:
//! - `permissions(id, aco, aco_foreign_key, aro, aro_foreign_key, type, created, modified)`
//!   with `aro IN ('User', 'Group')`, `aco = 'Resource'`, `type IN (1, 7, 15)`
//! - `groups_users(group_id, user_id)`
//!
//! Each named lookup is one statement on a pooled connection. Separate
//! lookups may see different states; the [`AclStore`] views run in one
//! read-only `REPEATABLE READ` transaction instead. A caller that checks and
//! mutates in its own transaction passes its connection to
//! [`PgStore::ownership_view_in`] or [`PgStore::subject_view_in`].

use crate::{AclStore, GroupMembershipIndex, OwnershipView, PermissionQuery, PermissionStore};
use async_trait::async_trait;
use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::{
    AccessLevel, GroupId, PermissionEntry, PermissionId, ResourceId, Subject, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const SELECT_ENTRIES: &str = r"
    SELECT
        id::text AS id,
        aro,
        aro_foreign_key::text AS aro_foreign_key,
        aco_foreign_key::text AS aco_foreign_key,
        type::SMALLINT AS level,
        EXTRACT(EPOCH FROM created)::BIGINT AS created,
        EXTRACT(EPOCH FROM modified)::BIGINT AS modified
    FROM permissions
    WHERE aco = 'Resource'
";

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: String,
    aro: String,
    aro_foreign_key: String,
    aco_foreign_key: String,
    level: i16,
    created: i64,
    modified: i64,
}

impl TryFrom<PermissionRow> for PermissionEntry {
    type Error = KeywardError;

    fn try_from(row: PermissionRow) -> KeywardResult<Self> {
        let corrupt =
            |e: KeywardError| KeywardError::Internal(format!("corrupt permission {}: {e}", row.id));

        let subject = Subject::from_parts(row.aro.parse().map_err(corrupt)?, &*row.aro_foreign_key)
            .map_err(corrupt)?;
        Ok(PermissionEntry {
            resource: ResourceId::new(&*row.aco_foreign_key).map_err(corrupt)?,
            level: AccessLevel::from_code(row.level).map_err(corrupt)?,
            created_at: epoch("created", row.created).map_err(corrupt)?,
            modified_at: epoch("modified", row.modified).map_err(corrupt)?,
            subject,
            id: PermissionId::new(&*row.id).map_err(corrupt)?,
        })
    }
}

fn epoch(column: &str, secs: i64) -> KeywardResult<u64> {
    u64::try_from(secs)
        .map_err(|_| KeywardError::Internal(format!("negative {column} timestamp {secs}")))
}

/// SQLSTATE classes for lost connections (08) and server shutdown (57P).
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57P")
}

/// Connection failures surface as `StorageUnavailable`; anything else the
/// database reports is internal.
fn map_sqlx(error: sqlx::Error) -> KeywardError {
    let unavailable = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map_or(false, |code| is_connection_sqlstate(&code)),
        _ => false,
    };

    if unavailable {
        KeywardError::StorageUnavailable(error.to_string())
    } else {
        KeywardError::Internal(error.to_string())
    }
}

fn into_entries(rows: Vec<PermissionRow>) -> KeywardResult<Vec<PermissionEntry>> {
    rows.into_iter().map(PermissionEntry::try_from).collect()
}

/// Appends `AND (<subject is one of subjects>)`.
fn push_subjects(qb: &mut QueryBuilder<'_, Postgres>, subjects: &[Subject]) {
    let mut user_ids = Vec::new();
    let mut group_ids = Vec::new();
    for subject in subjects {
        match subject {
            Subject::User(id) => user_ids.push(id.as_str().to_owned()),
            Subject::Group(id) => group_ids.push(id.as_str().to_owned()),
        }
    }

    qb.push(" AND ((aro = 'User' AND aro_foreign_key::text = ANY(")
        .push_bind(user_ids)
        .push(")) OR (aro = 'Group' AND aro_foreign_key::text = ANY(")
        .push_bind(group_ids)
        .push(")))");
}

async fn fetch_on(
    conn: &mut PgConnection,
    mut qb: QueryBuilder<'_, Postgres>,
) -> KeywardResult<Vec<PermissionEntry>> {
    let rows: Vec<PermissionRow> = qb
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    tracing::debug!(rows = rows.len(), "permission rows fetched");
    into_entries(rows)
}

async fn groups_of_on(conn: &mut PgConnection, user: &UserId) -> KeywardResult<HashSet<GroupId>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT group_id::text FROM groups_users WHERE user_id::text = $1")
            .bind(user.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx)?;

    rows.into_iter()
        .map(|(id,)| GroupId::new(id).map_err(|e| KeywardError::Internal(e.to_string())))
        .collect()
}

async fn members_of_on(conn: &mut PgConnection, group: &GroupId) -> KeywardResult<HashSet<UserId>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT user_id::text FROM groups_users WHERE group_id::text = $1")
            .bind(group.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx)?;

    rows.into_iter()
        .map(|(id,)| UserId::new(id).map_err(|e| KeywardError::Internal(e.to_string())))
        .collect()
}

/// Every entry on every resource one of `subjects` owns, in one statement.
async fn owned_resource_entries_on(
    conn: &mut PgConnection,
    subjects: &[Subject],
) -> KeywardResult<Vec<PermissionEntry>> {
    let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTRIES);
    qb.push(
        " AND aco_foreign_key IN (SELECT aco_foreign_key FROM permissions \
         WHERE aco = 'Resource' AND type = ",
    )
    .push_bind(AccessLevel::Owner.code());
    push_subjects(&mut qb, subjects);
    qb.push(")");

    fetch_on(conn, qb).await
}

/// Postgres-backed [`PermissionStore`] and [`GroupMembershipIndex`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> KeywardResult<Self> {
        if database_url.is_empty() {
            return Err(KeywardError::InvalidArgument(
                "database URL must not be empty".into(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| KeywardError::StorageUnavailable(format!("cannot connect: {e}")))?;

        tracing::info!("connected to permission database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// [`AclStore::ownership_view`] on a caller's connection, typically the
    /// transaction that will perform the guarded mutation.
    pub async fn ownership_view_in(
        conn: &mut PgConnection,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<OwnershipView> {
        let mut subjects = vec![Subject::User(user.clone())];
        if include_groups {
            let groups = groups_of_on(&mut *conn, user).await?;
            subjects.extend(groups.into_iter().map(Subject::Group));
        }
        let entries = owned_resource_entries_on(&mut *conn, &subjects).await?;

        Ok(OwnershipView {
            subjects,
            members: HashSet::new(),
            entries,
        })
    }

    /// [`AclStore::subject_view`] on a caller's connection.
    pub async fn subject_view_in(
        conn: &mut PgConnection,
        subject: &Subject,
    ) -> KeywardResult<OwnershipView> {
        let members = match subject {
            Subject::Group(group) => members_of_on(&mut *conn, group).await?,
            Subject::User(_) => HashSet::new(),
        };
        let subjects = vec![subject.clone()];
        let entries = owned_resource_entries_on(&mut *conn, &subjects).await?;

        Ok(OwnershipView {
            subjects,
            members,
            entries,
        })
    }

    async fn fetch(&self, qb: QueryBuilder<'_, Postgres>) -> KeywardResult<Vec<PermissionEntry>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        fetch_on(&mut conn, qb).await
    }

    /// Read-only snapshot transaction for the view methods.
    async fn begin_snapshot(&self) -> KeywardResult<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(tx)
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn query(&self, filter: &PermissionQuery) -> KeywardResult<Vec<PermissionEntry>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTRIES);

        if let Some(subject) = &filter.subject {
            qb.push(" AND aro = ")
                .push_bind(subject.kind().as_str())
                .push(" AND aro_foreign_key::text = ")
                .push_bind(subject.id_str().to_owned());
        }
        if let Some(kind) = filter.subject_kind {
            qb.push(" AND aro = ").push_bind(kind.as_str());
        }
        if let Some(resource) = &filter.resource {
            qb.push(" AND aco_foreign_key::text = ")
                .push_bind(resource.as_str().to_owned());
        }
        if let Some(level) = filter.level {
            qb.push(" AND type = ").push_bind(level.code());
        }

        self.fetch(qb).await
    }

    async fn entries_by_subjects(
        &self,
        subjects: &[Subject],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        if subjects.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTRIES);
        push_subjects(&mut qb, subjects);
        self.fetch(qb).await
    }

    async fn entries_by_resources(
        &self,
        resources: &[ResourceId],
    ) -> KeywardResult<Vec<PermissionEntry>> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = resources.iter().map(|r| r.as_str().to_owned()).collect();
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTRIES);
        qb.push(" AND aco_foreign_key::text = ANY(")
            .push_bind(ids)
            .push(")");

        self.fetch(qb).await
    }
}

#[async_trait]
impl GroupMembershipIndex for PgStore {
    async fn groups_of(&self, user: &UserId) -> KeywardResult<HashSet<GroupId>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        groups_of_on(&mut conn, user).await
    }

    async fn members_of(&self, group: &GroupId) -> KeywardResult<HashSet<UserId>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        members_of_on(&mut conn, group).await
    }
}

#[async_trait]
impl AclStore for PgStore {
    async fn ownership_view(
        &self,
        user: &UserId,
        include_groups: bool,
    ) -> KeywardResult<OwnershipView> {
        let mut tx = self.begin_snapshot().await?;
        let view = Self::ownership_view_in(&mut tx, user, include_groups).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(view)
    }

    async fn subject_view(&self, subject: &Subject) -> KeywardResult<OwnershipView> {
        let mut tx = self.begin_snapshot().await?;
        let view = Self::subject_view_in(&mut tx, subject).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(aro: &str, level: i16) -> PermissionRow {
        PermissionRow {
            id: "p1".into(),
            aro: aro.into(),
            aro_foreign_key: "nancy".into(),
            aco_foreign_key: "openpgpjs".into(),
            level,
            created: 1_500_000_000,
            modified: 1_500_000_060,
        }
    }

    #[test]
    fn row_maps_to_entry() {
        let entry = PermissionEntry::try_from(row("User", 15)).unwrap();
        assert_eq!(entry.subject, Subject::User(UserId::new("nancy").unwrap()));
        assert!(entry.is_owner());
        assert_eq!(entry.modified_at, 1_500_000_060);
    }

    #[test]
    fn unknown_aro_or_level_is_internal() {
        assert!(matches!(
            PermissionEntry::try_from(row("Robot", 15)),
            Err(KeywardError::Internal(_))
        ));
        assert!(matches!(
            PermissionEntry::try_from(row("Group", 4)),
            Err(KeywardError::Internal(_))
        ));
    }

    #[test]
    fn negative_timestamp_is_internal() {
        let mut bad = row("User", 15);
        bad.created = -1;
        assert!(matches!(
            PermissionEntry::try_from(bad),
            Err(KeywardError::Internal(_))
        ));

        let mut bad = row("User", 15);
        bad.modified = i64::MIN;
        assert!(PermissionEntry::try_from(bad).is_err());
    }

    #[test]
    fn connection_sqlstates() {
        // connection_failure, admin_shutdown, crash_shutdown
        for code in ["08006", "08001", "57P01", "57P02"] {
            assert!(is_connection_sqlstate(code), "{code}");
        }
        // unique_violation, query_canceled, syntax_error
        for code in ["23505", "57014", "42601"] {
            assert!(!is_connection_sqlstate(code), "{code}");
        }
    }

    #[test]
    fn io_error_is_unavailable() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(matches!(map_sqlx(err), KeywardError::StorageUnavailable(_)));
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(matches!(
            map_sqlx(sqlx::Error::PoolTimedOut),
            KeywardError::StorageUnavailable(_)
        ));
        assert!(matches!(
            map_sqlx(sqlx::Error::RowNotFound),
            KeywardError::Internal(_)
        ));
    }
}
