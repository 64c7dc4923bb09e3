//! Per-repository, per-stream watermark updates. Monotonicity lives in the
//! SQL: GREATEST means no caller ordering can move a mark backward.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{EventStream, Watermark, WatermarkRow};

pub async fn get_watermark<'c, E>(
    executor: E,
    estate_id: i32,
    repo_external_id: &str,
    stream: EventStream,
) -> Result<Option<Watermark>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row: Option<WatermarkRow> = sqlx::query_as(
        r#"
SELECT estate_id, repo_external_id, stream, ingested_at, seen_at, resume_cursor, updated_at
FROM ingestion_watermarks
WHERE estate_id = $1 AND repo_external_id = $2 AND stream = $3
        "#,
    )
    .bind(estate_id)
    .bind(repo_external_id)
    .bind(stream.to_string())
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(Watermark::try_from(row)?)),
        None => Ok(None),
    }
}

/// Record the newest occurrence timestamp observed while paging through a
/// backlog. Only the catch-up high-water moves; the persisted watermark stays
/// put until the window completes.
pub async fn record_seen<'c, E>(
    executor: E,
    estate_id: i32,
    repo_external_id: &str,
    stream: EventStream,
    observed_at: DateTime<Utc>,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
INSERT INTO ingestion_watermarks (estate_id, repo_external_id, stream, seen_at, updated_at)
VALUES ($1, $2, $3, $4, now())
ON CONFLICT (estate_id, repo_external_id, stream)
DO UPDATE SET
    seen_at = GREATEST(ingestion_watermarks.seen_at, EXCLUDED.seen_at),
    updated_at = now()
        "#,
    )
    .bind(estate_id)
    .bind(repo_external_id)
    .bind(stream.to_string())
    .bind(observed_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Complete a catch-up window: the persisted watermark takes the high-water
/// (including items that were filtered as noise) and the resume cursor is
/// cleared. A window that observed nothing leaves the marks untouched, so the
/// next poll re-scans the same window rather than skipping ahead.
pub async fn complete_catchup<'c, E>(
    executor: E,
    estate_id: i32,
    repo_external_id: &str,
    stream: EventStream,
    observed_at: Option<DateTime<Utc>>,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
INSERT INTO ingestion_watermarks
    (estate_id, repo_external_id, stream, ingested_at, seen_at, resume_cursor, updated_at)
VALUES ($1, $2, $3, $4, $4, NULL, now())
ON CONFLICT (estate_id, repo_external_id, stream)
DO UPDATE SET
    ingested_at = GREATEST(
        ingestion_watermarks.ingested_at,
        ingestion_watermarks.seen_at,
        EXCLUDED.ingested_at
    ),
    seen_at = GREATEST(ingestion_watermarks.seen_at, EXCLUDED.seen_at),
    resume_cursor = NULL,
    updated_at = now()
        "#,
    )
    .bind(estate_id)
    .bind(repo_external_id)
    .bind(stream.to_string())
    .bind(observed_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Persist the pagination cursor so an interrupted or truncated catch-up
/// resumes where it stopped instead of re-fetching the whole window.
pub async fn save_cursor<'c, E>(
    executor: E,
    estate_id: i32,
    repo_external_id: &str,
    stream: EventStream,
    cursor: &str,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
INSERT INTO ingestion_watermarks (estate_id, repo_external_id, stream, resume_cursor, updated_at)
VALUES ($1, $2, $3, $4, now())
ON CONFLICT (estate_id, repo_external_id, stream)
DO UPDATE SET resume_cursor = EXCLUDED.resume_cursor, updated_at = now()
        "#,
    )
    .bind(estate_id)
    .bind(repo_external_id)
    .bind(stream.to_string())
    .bind(cursor)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_watermarks<'c, E>(
    executor: E,
    estate_id: i32,
) -> Result<Vec<Watermark>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let rows: Vec<WatermarkRow> = sqlx::query_as(
        r#"
SELECT estate_id, repo_external_id, stream, ingested_at, seen_at, resume_cursor, updated_at
FROM ingestion_watermarks
WHERE estate_id = $1
ORDER BY repo_external_id, stream
        "#,
    )
    .bind(estate_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| Watermark::try_from(row).map_err(Into::into))
        .collect()
}
