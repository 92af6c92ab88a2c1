//! Two-tier row retrieval.
//!
//! [`retrieve`] first tries a full-text match ordered by recency. If that
//! attempt fails for any reason (most often because the deployed schema has
//! no `search_fts` column), the failed transaction is rolled back and a
//! case-insensitive substring match ordered by `id` serves the request
//! instead. Only a failure of the second attempt is fatal.
//!
//! The two result orders differ on purpose: callers can tell which path
//! answered from [`Retrieval::strategy`].
//!
//! The algorithm is written against [`CatalogStore`] so it can be exercised
//! without a database; [`PgCatalog`] is the PostgreSQL implementation.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;

use crate::error::QueryError;
use crate::models::{CatalogRow, Retrieval, SearchStrategy};

/// Storage backend able to run both retrieval strategies.
///
/// Each method must leave the connection usable after an error, i.e. any
/// transaction it opened is rolled back before it returns.
#[async_trait]
pub trait CatalogStore: Send {
    /// Full-text match, newest first, at most `limit` rows.
    async fn full_text(&mut self, query: &str, limit: i64) -> Result<Vec<CatalogRow>, sqlx::Error>;

    /// Substring match, lowest id first, at most `limit` rows.
    async fn substring(&mut self, query: &str, limit: i64) -> Result<Vec<CatalogRow>, sqlx::Error>;
}

/// Why the full-text attempt was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCause {
    /// The search column, table or function does not exist on this schema.
    SchemaMismatch,
    /// Anything else: bad input, server error, lost connection.
    Query,
}

impl FallbackCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackCause::SchemaMismatch => "schema_mismatch",
            FallbackCause::Query => "query_error",
        }
    }
}

/// Classify a full-text failure by SQLSTATE.
///
/// `42703` undefined_column, `42P01` undefined_table, `42883`
/// undefined_function and `42704` undefined_object mean the FTS feature is
/// not deployed. Every other error is reported as a query error so it stays
/// visible in the logs even though the fallback still runs.
pub fn classify_failure(err: &sqlx::Error) -> FallbackCause {
    match err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("42703" | "42P01" | "42883" | "42704") => FallbackCause::SchemaMismatch,
            _ => FallbackCause::Query,
        },
        _ => FallbackCause::Query,
    }
}

/// Run the full-text strategy, falling back to substring matching.
pub async fn retrieve<S>(store: &mut S, query: &str, limit: i64) -> Result<Retrieval, QueryError>
where
    S: CatalogStore + ?Sized,
{
    match store.full_text(query, limit).await {
        Ok(rows) => {
            return Ok(finish(rows, SearchStrategy::FullText, limit));
        }
        Err(err) => {
            let cause = classify_failure(&err);
            tracing::warn!(
                cause = cause.as_str(),
                error = %err,
                "full-text search failed, falling back to substring match"
            );
        }
    }

    let rows = store
        .substring(query, limit)
        .await
        .map_err(QueryError::Retrieval)?;

    Ok(finish(rows, SearchStrategy::Substring, limit))
}

fn finish(mut rows: Vec<CatalogRow>, strategy: SearchStrategy, limit: i64) -> Retrieval {
    rows.truncate(limit.max(0) as usize);
    tracing::debug!(strategy = strategy.as_str(), count = rows.len(), "rows retrieved");
    Retrieval { rows, strategy }
}

// ============ PostgreSQL ============

/// [`CatalogStore`] over one PostgreSQL table.
///
/// Rows are encoded server-side with `json_build_object`, so column types
/// the schema chooses (integer or uuid ids, `text[]` tags, ...) reach the
/// output unchanged.
pub struct PgCatalog<'a> {
    pool: &'a PgPool,
    table: &'a str,
}

impl<'a> PgCatalog<'a> {
    /// `table` must already be validated by [`crate::config::is_valid_table_name`].
    pub fn new(pool: &'a PgPool, table: &'a str) -> Self {
        Self { pool, table }
    }

    fn full_text_sql(&self) -> String {
        format!(
            r#"
            SELECT json_build_object(
                'id', id, 'name', name, 'aliases', aliases, 'tags', tags, 'notes', notes
            ) AS row
            FROM {}
            WHERE search_fts @@ plainto_tsquery('simple', $1)
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
            self.table
        )
    }

    fn substring_sql(&self) -> String {
        format!(
            r#"
            SELECT json_build_object(
                'id', id, 'name', name, 'aliases', aliases, 'tags', tags, 'notes', notes
            ) AS row
            FROM {}
            WHERE COALESCE(name, '') ILIKE $1
               OR COALESCE(notes, '') ILIKE $1
               OR COALESCE(tags_concatenated, '') ILIKE $1
               OR COALESCE(notes_concatenated, '') ILIKE $1
            ORDER BY id ASC
            LIMIT $2
            "#,
            self.table
        )
    }

    /// Run one statement inside its own transaction, rolling back on error.
    async fn fetch(&self, sql: &str, arg: &str, limit: i64) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query_scalar::<_, Json<CatalogRow>>(sql)
            .bind(arg)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await;

        match result {
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows.into_iter().map(|Json(row)| row).collect())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed query also failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<'a> CatalogStore for PgCatalog<'a> {
    async fn full_text(&mut self, query: &str, limit: i64) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let sql = self.full_text_sql();
        self.fetch(&sql, query, limit).await
    }

    async fn substring(&mut self, query: &str, limit: i64) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let sql = self.substring_sql();
        let pattern = format!("%{}%", query);
        self.fetch(&sql, &pattern, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::borrow::Cow;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError(&'static str);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error {}", self.0)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError(code)))
    }

    fn row(id: i64, name: &str, updated_at: i64) -> (CatalogRow, i64) {
        (
            CatalogRow {
                id: json!(id),
                name: json!(name),
                notes: json!(format!("notes for {}", name)),
                ..Default::default()
            },
            updated_at,
        )
    }

    /// In-memory table with an optional full-text index.
    struct FakeStore {
        rows: Vec<(CatalogRow, i64)>,
        full_text_error: Option<&'static str>,
        substring_fails: bool,
        calls: Vec<&'static str>,
    }

    impl FakeStore {
        fn new(rows: Vec<(CatalogRow, i64)>) -> Self {
            Self {
                rows,
                full_text_error: None,
                substring_fails: false,
                calls: Vec::new(),
            }
        }

        fn matching(&self, query: &str) -> Vec<(CatalogRow, i64)> {
            let needle = query.to_lowercase();
            self.rows
                .iter()
                .filter(|(r, _)| r.context_line().to_lowercase().contains(&needle))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl CatalogStore for FakeStore {
        async fn full_text(
            &mut self,
            query: &str,
            limit: i64,
        ) -> Result<Vec<CatalogRow>, sqlx::Error> {
            self.calls.push("full_text");
            if let Some(code) = self.full_text_error {
                return Err(db_error(code));
            }
            let mut hits = self.matching(query);
            hits.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(hits.into_iter().take(limit as usize).map(|(r, _)| r).collect())
        }

        async fn substring(
            &mut self,
            query: &str,
            limit: i64,
        ) -> Result<Vec<CatalogRow>, sqlx::Error> {
            self.calls.push("substring");
            if self.substring_fails {
                return Err(db_error("42P01"));
            }
            let mut hits = self.matching(query);
            hits.sort_by_key(|(r, _)| r.id.as_i64());
            Ok(hits.into_iter().take(limit as usize).map(|(r, _)| r).collect())
        }
    }

    fn sample() -> Vec<(CatalogRow, i64)> {
        vec![
            row(1, "Lisinopril ACE inhibitor", 100),
            row(2, "Enalapril ACE inhibitor", 300),
            row(3, "Ramipril ACE inhibitor", 200),
            row(4, "Metformin", 400),
        ]
    }

    fn ids(retrieval: &Retrieval) -> Vec<i64> {
        retrieval.rows.iter().filter_map(|r| r.id.as_i64()).collect()
    }

    #[tokio::test]
    async fn full_text_orders_by_recency() {
        let mut store = FakeStore::new(sample());
        let got = retrieve(&mut store, "ACE inhibitor", 2).await.unwrap();

        assert_eq!(got.strategy, SearchStrategy::FullText);
        assert_eq!(ids(&got), vec![2, 3]);
        assert_eq!(store.calls, vec!["full_text"]);
    }

    #[tokio::test]
    async fn falls_back_to_substring_ordered_by_id() {
        let mut store = FakeStore::new(sample());
        store.full_text_error = Some("42703");

        let got = retrieve(&mut store, "ace inhibitor", 2).await.unwrap();

        assert_eq!(got.strategy, SearchStrategy::Substring);
        assert_eq!(ids(&got), vec![1, 2]);
        assert_eq!(store.calls, vec!["full_text", "substring"]);
    }

    #[tokio::test]
    async fn falls_back_on_unrelated_query_errors_too() {
        let mut store = FakeStore::new(sample());
        store.full_text_error = Some("22P02");

        let got = retrieve(&mut store, "Metformin", 5).await.unwrap();
        assert_eq!(got.strategy, SearchStrategy::Substring);
        assert_eq!(ids(&got), vec![4]);
    }

    #[tokio::test]
    async fn both_failing_is_retrieval_error() {
        let mut store = FakeStore::new(sample());
        store.full_text_error = Some("42703");
        store.substring_fails = true;

        let err = retrieve(&mut store, "ACE", 5).await.unwrap_err();
        assert!(matches!(err, QueryError::Retrieval(_)));
        assert_eq!(err.exit_code(), 3);
        // The error surfaced is the fallback's, not the full-text one.
        assert!(err.to_string().contains("42P01"), "got: {}", err);
    }

    #[tokio::test]
    async fn empty_result_is_not_a_failure() {
        let mut store = FakeStore::new(sample());
        let got = retrieve(&mut store, "no such drug", 5).await.unwrap();
        assert_eq!(got.strategy, SearchStrategy::FullText);
        assert!(got.rows.is_empty());
        assert_eq!(store.calls, vec!["full_text"]);
    }

    #[tokio::test]
    async fn result_never_exceeds_limit() {
        struct Overflowing;

        #[async_trait]
        impl CatalogStore for Overflowing {
            async fn full_text(&mut self, _: &str, _: i64) -> Result<Vec<CatalogRow>, sqlx::Error> {
                Ok(vec![CatalogRow::default(); 10])
            }
            async fn substring(&mut self, _: &str, _: i64) -> Result<Vec<CatalogRow>, sqlx::Error> {
                unreachable!()
            }
        }

        let got = retrieve(&mut Overflowing, "x", 3).await.unwrap();
        assert_eq!(got.rows.len(), 3);
    }

    #[test]
    fn classifies_missing_fts_as_schema_mismatch() {
        for code in ["42703", "42P01", "42883", "42704"] {
            assert_eq!(classify_failure(&db_error(code)), FallbackCause::SchemaMismatch);
        }
    }

    #[test]
    fn classifies_other_failures_as_query_errors() {
        assert_eq!(classify_failure(&db_error("22P02")), FallbackCause::Query);
        assert_eq!(classify_failure(&sqlx::Error::PoolTimedOut), FallbackCause::Query);
        assert_eq!(classify_failure(&sqlx::Error::RowNotFound), FallbackCause::Query);
    }

    #[tokio::test]
    async fn sql_uses_configured_table() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://u:p@localhost/db")
            .unwrap();
        let catalog = PgCatalog::new(&pool, "catalog.items");

        let fts = catalog.full_text_sql();
        assert!(fts.contains("FROM catalog.items"));
        assert!(fts.contains("plainto_tsquery('simple', $1)"));
        assert!(fts.contains("ORDER BY updated_at DESC"));

        let sub = catalog.substring_sql();
        assert!(sub.contains("FROM catalog.items"));
        assert!(sub.contains("COALESCE(tags_concatenated, '') ILIKE $1"));
        assert!(sub.contains("ORDER BY id ASC"));
    }
}
