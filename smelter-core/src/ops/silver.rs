//! Idempotent writes into the silver entity model. Every upsert SET list is
//! derived from the event payload alone, so replaying an event leaves rows
//! byte-identical.

use crate::error::StoreError;
use crate::types::{
    CommitUpsert, DocChangeUpsert, EntityKind, IssueUpsert, PullRequestUpsert,
};

/// Resolve a repository row by natural key, creating it with catalogue
/// defaults on first reference from any transformer.
pub async fn get_or_create_repository<'c, E>(
    executor: E,
    estate_id: i32,
    external_id: &str,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
INSERT INTO repositories (estate_id, external_id)
VALUES ($1, $2)
ON CONFLICT (estate_id, external_id) DO UPDATE SET external_id = EXCLUDED.external_id -- no-op to get a returned row
RETURNING id
        "#,
    )
    .bind(estate_id)
    .bind(external_id)
    .fetch_one(executor)
    .await?)
}

pub async fn upsert_commit<'c, E>(
    executor: E,
    repository_id: i64,
    commit: &CommitUpsert,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
INSERT INTO commits (repository_id, sha, message, author_login, author_email, authored_at, is_stub)
VALUES ($1, $2, $3, $4, $5, $6, FALSE)
ON CONFLICT (repository_id, sha) DO UPDATE SET
    message = EXCLUDED.message,
    author_login = EXCLUDED.author_login,
    author_email = EXCLUDED.author_email,
    authored_at = EXCLUDED.authored_at,
    is_stub = FALSE
RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(&commit.sha)
    .bind(&commit.message)
    .bind(&commit.author_login)
    .bind(&commit.author_email)
    .bind(commit.authored_at)
    .fetch_one(executor)
    .await?)
}

/// Make sure a commit row exists for the given sha, creating a stub when the
/// real commit has not been ingested yet. Never clobbers an existing row, so
/// a real commit that raced us keeps its fields.
pub async fn ensure_commit_exists<'c, A>(
    connection: A,
    repository_id: i64,
    sha: &str,
) -> Result<i64, StoreError>
where
    A: sqlx::Acquire<'c, Database = sqlx::Postgres>,
{
    let mut conn = connection.acquire().await?;

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
INSERT INTO commits (repository_id, sha, is_stub)
VALUES ($1, $2, TRUE)
ON CONFLICT (repository_id, sha) DO NOTHING
RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(sha)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = inserted {
        return Ok(id);
    }

    Ok(
        sqlx::query_scalar("SELECT id FROM commits WHERE repository_id = $1 AND sha = $2")
            .bind(repository_id)
            .bind(sha)
            .fetch_one(&mut *conn)
            .await?,
    )
}

pub async fn upsert_pull_request<'c, E>(
    executor: E,
    repository_id: i64,
    pr: &PullRequestUpsert,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
INSERT INTO pull_requests
    (repository_id, number, title, author_login, state, labels, opened_at, merged_at, closed_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (repository_id, number) DO UPDATE SET
    title = EXCLUDED.title,
    author_login = EXCLUDED.author_login,
    state = EXCLUDED.state,
    labels = EXCLUDED.labels,
    opened_at = EXCLUDED.opened_at,
    merged_at = EXCLUDED.merged_at,
    closed_at = EXCLUDED.closed_at
RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(pr.number)
    .bind(&pr.title)
    .bind(&pr.author_login)
    .bind(&pr.state)
    .bind(&pr.labels)
    .bind(pr.opened_at)
    .bind(pr.merged_at)
    .bind(pr.closed_at)
    .fetch_one(executor)
    .await?)
}

pub async fn upsert_issue<'c, E>(
    executor: E,
    repository_id: i64,
    issue: &IssueUpsert,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
INSERT INTO issues
    (repository_id, number, title, author_login, state, labels, opened_at, closed_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (repository_id, number) DO UPDATE SET
    title = EXCLUDED.title,
    author_login = EXCLUDED.author_login,
    state = EXCLUDED.state,
    labels = EXCLUDED.labels,
    opened_at = EXCLUDED.opened_at,
    closed_at = EXCLUDED.closed_at
RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(issue.number)
    .bind(&issue.title)
    .bind(&issue.author_login)
    .bind(&issue.state)
    .bind(&issue.labels)
    .bind(issue.opened_at)
    .bind(issue.closed_at)
    .fetch_one(executor)
    .await?)
}

pub async fn upsert_doc_change<'c, E>(
    executor: E,
    repository_id: i64,
    change: &DocChangeUpsert,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
INSERT INTO doc_changes (repository_id, commit_id, path, change_kind, changed_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (repository_id, commit_id, path) DO UPDATE SET
    change_kind = EXCLUDED.change_kind,
    changed_at = EXCLUDED.changed_at
RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(change.commit_id)
    .bind(&change.path)
    .bind(&change.change_kind)
    .bind(change.changed_at)
    .fetch_one(executor)
    .await?)
}

/// Audit linkage from the raw event to a silver row it touched. Idempotent,
/// so replays do not duplicate facts.
pub async fn record_event_fact<'c, E>(
    executor: E,
    raw_event_id: i64,
    repository_id: i64,
    entity_kind: EntityKind,
    entity_id: i64,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
INSERT INTO event_facts (raw_event_id, repository_id, entity_kind, entity_id)
VALUES ($1, $2, $3, $4)
ON CONFLICT (raw_event_id, entity_kind, entity_id) DO NOTHING
        "#,
    )
    .bind(raw_event_id)
    .bind(repository_id)
    .bind(entity_kind.to_string())
    .bind(entity_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Stub commit counts per repository, for the ingestion health surface. A
/// stub that never gets completed usually means upstream history was
/// rewritten.
pub async fn count_stub_commits<'c, E>(
    executor: E,
    estate_id: i32,
) -> Result<Vec<(String, i64)>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_as(
        r#"
SELECT r.external_id, count(*)
FROM commits c
JOIN repositories r ON r.id = c.repository_id
WHERE r.estate_id = $1 AND c.is_stub
GROUP BY r.external_id
ORDER BY r.external_id
        "#,
    )
    .bind(estate_id)
    .fetch_all(executor)
    .await?)
}
