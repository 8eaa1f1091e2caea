use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use utils::text::truncate_with_suffix;

/// Longest name a request may carry, tombstoned names included.
pub const REQUEST_NAME_MAX_LEN: usize = 255;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, Default,
)]
#[sqlx(type_name = "approval_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    NotDetermined,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// Approved and Rejected have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::NotDetermined)
    }
}

/// A pending project-creation request.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: i64,
    pub owner_id: i64,
    /// Denormalized owner display name.
    pub owner_name: String,
    pub name: String,
    pub approval_status: ApprovalStatus,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub owner_id: i64,
    pub owner_name: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RequestSort {
    CreatedAtAsc,
    #[default]
    CreatedAtDesc,
    NameAsc,
    NameDesc,
}

impl RequestSort {
    pub fn to_sql(&self) -> &'static str {
        match self {
            RequestSort::CreatedAtAsc => "created_at ASC, id ASC",
            RequestSort::CreatedAtDesc => "created_at DESC, id DESC",
            RequestSort::NameAsc => "name ASC",
            RequestSort::NameDesc => "name DESC",
        }
    }

    /// Parses the `sort` query parameter (`name`, `-name`, `created_at`, `-created_at`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "created_at" | "creation_time" => Some(RequestSort::CreatedAtAsc),
            "-created_at" | "-creation_time" => Some(RequestSort::CreatedAtDesc),
            "name" => Some(RequestSort::NameAsc),
            "-name" => Some(RequestSort::NameDesc),
            _ => None,
        }
    }
}

/// Filters for listing and counting requests. Tombstoned records never match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestQuery {
    /// Exact name.
    pub name: Option<String>,
    /// Substring match on name.
    pub name_contains: Option<String>,
    /// Any of these names.
    pub names: Vec<String>,
    pub owner_id: Option<i64>,
    pub owner_name: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    /// 1-based page; ignored without `page_size`.
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort: RequestSort,
}

impl RequestQuery {
    /// LIMIT/OFFSET pair when paging was requested.
    fn limit_offset(&self) -> Option<(i64, i64)> {
        let size = self.page_size.filter(|size| *size > 0)?;
        let page = self.page.unwrap_or(1).max(1);
        Some((size, (page - 1) * size))
    }

    fn push_filters(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE deleted = FALSE");

        if let Some(name) = &self.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(fragment) = &self.name_contains {
            builder
                .push(" AND name LIKE ")
                .push_bind(format!("%{}%", escape_like(fragment)))
                .push(" ESCAPE '\\'");
        }
        if !self.names.is_empty() {
            builder.push(" AND name IN (");
            let mut separated = builder.separated(", ");
            for name in &self.names {
                separated.push_bind(name.clone());
            }
            separated.push_unseparated(")");
        }
        if let Some(owner_id) = self.owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id);
        }
        if let Some(owner_name) = &self.owner_name {
            builder.push(" AND owner_name = ").push_bind(owner_name.clone());
        }
        if let Some(status) = self.approval_status {
            builder.push(" AND approval_status = ").push_bind(status);
        }
    }
}

fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Request {
    pub async fn create(pool: &SqlitePool, data: &CreateRequest) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Request>(
            r#"INSERT INTO requests (owner_id, owner_name, name)
               VALUES ($1, $2, $3)
               RETURNING *"#,
        )
        .bind(data.owner_id)
        .bind(&data.owner_name)
        .bind(&data.name)
        .fetch_one(pool)
        .await
    }

    /// Live record by id.
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 AND deleted = FALSE")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Record by id, tombstones included.
    pub async fn find_by_id_including_deleted(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Live record by name.
    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE name = $1 AND deleted = FALSE")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool, query: &RequestQuery) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM requests");
        query.push_filters(&mut builder);
        builder.push(" ORDER BY ").push(query.sort.to_sql());
        if let Some((limit, offset)) = query.limit_offset() {
            builder
                .push(" LIMIT ")
                .push_bind(limit)
                .push(" OFFSET ")
                .push_bind(offset);
        }

        builder.build_query_as::<Request>().fetch_all(pool).await
    }

    pub async fn count(pool: &SqlitePool, query: &RequestQuery) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM requests");
        query.push_filters(&mut builder);
        builder.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Moves a live record from `from` to `to`. Returns the number of rows
    /// changed, which is zero when the record is gone or no longer in `from`.
    pub async fn transition_status(
        pool: &SqlitePool,
        id: i64,
        from: ApprovalStatus,
        to: ApprovalStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE requests
               SET approval_status = $3, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND approval_status = $2 AND deleted = FALSE"#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Refreshes the denormalized owner display name on every live record the
    /// owner holds. Tombstones keep the name they were deleted with.
    pub async fn update_owner_name(
        pool: &SqlitePool,
        owner_id: i64,
        owner_name: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE requests
               SET owner_name = $2
               WHERE owner_id = $1 AND owner_name != $2 AND deleted = FALSE"#,
        )
        .bind(owner_id)
        .bind(owner_name)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Tombstones a live record: its name becomes `name#id` so the original
    /// name can be reused. Returns the tombstone, or `None` if no live record
    /// had that id.
    pub async fn soft_delete(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let Some(current) = sqlx::query_as::<_, Request>(
            "SELECT * FROM requests WHERE id = $1 AND deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let tombstone_name =
            truncate_with_suffix(&current.name, &format!("#{}", current.id), REQUEST_NAME_MAX_LEN);

        let deleted = sqlx::query_as::<_, Request>(
            r#"UPDATE requests
               SET deleted = TRUE, name = $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND deleted = FALSE
               RETURNING *"#,
        )
        .bind(id)
        .bind(tombstone_name)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;
    use crate::{DBService, is_unique_violation};

    async fn test_db() -> (DBService, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = DBService::new(file.path()).await.unwrap();
        (db, file)
    }

    fn new_request(name: &str, owner_id: i64) -> CreateRequest {
        CreateRequest {
            owner_id,
            owner_name: format!("user{owner_id}"),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_defaults_to_not_determined() {
        let (db, _file) = test_db().await;
        let request = Request::create(&db.pool, &new_request("alpha", 1))
            .await
            .unwrap();

        assert_eq!(request.name, "alpha");
        assert_eq!(request.owner_name, "user1");
        assert_eq!(request.approval_status, ApprovalStatus::NotDetermined);
        assert!(!request.deleted);
    }

    #[tokio::test]
    async fn test_duplicate_live_name_is_unique_violation() {
        let (db, _file) = test_db().await;
        Request::create(&db.pool, &new_request("alpha", 1))
            .await
            .unwrap();

        let err = Request::create(&db.pool, &new_request("alpha", 2))
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_soft_delete_renames_and_frees_name() {
        let (db, _file) = test_db().await;
        let request = Request::create(&db.pool, &new_request("foo", 1))
            .await
            .unwrap();

        let tombstone = Request::soft_delete(&db.pool, request.id)
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.name, format!("foo#{}", request.id));

        assert!(Request::find_by_id(&db.pool, request.id).await.unwrap().is_none());
        assert!(Request::find_by_name(&db.pool, "foo").await.unwrap().is_none());
        let raw = Request::find_by_id_including_deleted(&db.pool, request.id)
            .await
            .unwrap()
            .unwrap();
        assert!(raw.deleted);

        // Name is free again.
        Request::create(&db.pool, &new_request("foo", 1))
            .await
            .unwrap();

        // Deleting twice finds nothing.
        assert!(Request::soft_delete(&db.pool, request.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_status_only_from_expected_state() {
        let (db, _file) = test_db().await;
        let request = Request::create(&db.pool, &new_request("alpha", 1))
            .await
            .unwrap();

        let changed = Request::transition_status(
            &db.pool,
            request.id,
            ApprovalStatus::NotDetermined,
            ApprovalStatus::Approved,
        )
        .await
        .unwrap();
        assert_eq!(changed, 1);

        let changed = Request::transition_status(
            &db.pool,
            request.id,
            ApprovalStatus::NotDetermined,
            ApprovalStatus::Rejected,
        )
        .await
        .unwrap();
        assert_eq!(changed, 0);

        let stored = Request::find_by_id(&db.pool, request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_list_and_count_apply_filters_and_paging() {
        let (db, _file) = test_db().await;
        for (name, owner) in [("alpha", 1), ("alpine", 1), ("beta", 2), ("gamma", 2)] {
            Request::create(&db.pool, &new_request(name, owner))
                .await
                .unwrap();
        }
        let beta = Request::find_by_name(&db.pool, "beta").await.unwrap().unwrap();
        Request::soft_delete(&db.pool, beta.id).await.unwrap();

        let all = RequestQuery::default();
        assert_eq!(Request::count(&db.pool, &all).await.unwrap(), 3);

        let fuzzy = RequestQuery {
            name_contains: Some("alp".to_string()),
            sort: RequestSort::NameAsc,
            ..Default::default()
        };
        let names: Vec<String> = Request::list(&db.pool, &fuzzy)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "alpine"]);

        let by_owner = RequestQuery {
            owner_name: Some("user2".to_string()),
            ..Default::default()
        };
        assert_eq!(Request::count(&db.pool, &by_owner).await.unwrap(), 1);

        let paged = RequestQuery {
            page: Some(2),
            page_size: Some(2),
            sort: RequestSort::NameAsc,
            ..Default::default()
        };
        let page: Vec<String> = Request::list(&db.pool, &paged)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(page, vec!["gamma"]);

        let by_names = RequestQuery {
            names: vec!["alpha".to_string(), "gamma".to_string(), "beta".to_string()],
            ..Default::default()
        };
        assert_eq!(Request::count(&db.pool, &by_names).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_owner_name_touches_only_that_owner() {
        let (db, _file) = test_db().await;
        let mine = Request::create(&db.pool, &new_request("alpha", 1))
            .await
            .unwrap();
        let theirs = Request::create(&db.pool, &new_request("beta", 2))
            .await
            .unwrap();
        let gone = Request::create(&db.pool, &new_request("gamma", 1))
            .await
            .unwrap();
        Request::soft_delete(&db.pool, gone.id).await.unwrap();

        let changed = Request::update_owner_name(&db.pool, 1, "renamed")
            .await
            .unwrap();
        assert_eq!(changed, 1);
        // Same name again is a no-op.
        assert_eq!(
            Request::update_owner_name(&db.pool, 1, "renamed").await.unwrap(),
            0
        );

        let mine = Request::find_by_id(&db.pool, mine.id).await.unwrap().unwrap();
        let theirs = Request::find_by_id(&db.pool, theirs.id).await.unwrap().unwrap();
        assert_eq!(mine.owner_name, "renamed");
        assert_eq!(theirs.owner_name, "user2");
        let gone = Request::find_by_id_including_deleted(&db.pool, gone.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gone.owner_name, "user1");
    }

    #[test]
    fn test_like_fragment_is_escaped() {
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!(RequestSort::parse("-name"), Some(RequestSort::NameDesc));
        assert_eq!(RequestSort::parse("creation_time"), Some(RequestSort::CreatedAtAsc));
        assert_eq!(RequestSort::parse("owner"), None);
    }
}
