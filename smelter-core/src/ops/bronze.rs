//! Queries over the append-only raw event log.

use crate::error::StoreError;
use crate::types::{RawEvent, RawEventInit, RawEventRow};

/// Outcome of an append: the id of the row now holding this dedup key, and
/// whether this call created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub id: i64,
    pub created: bool,
}

/// Append a raw event, or return the row that already holds its dedup key.
/// Safe to call again with the same event after a crashed or retried poll.
pub async fn append_raw_event<'c, A>(
    connection: A,
    init: &RawEventInit,
) -> Result<AppendOutcome, StoreError>
where
    A: sqlx::Acquire<'c, Database = sqlx::Postgres>,
{
    let mut conn = connection.acquire().await?;

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
INSERT INTO raw_events
    (estate_id, source_system, source_event_id, event_type, repo_external_id, occurred_at, ingested_at, dedup_key, payload)
VALUES
    ($1, $2, $3, $4, $5, $6, now(), $7, $8)
ON CONFLICT (source_system, dedup_key) DO NOTHING
RETURNING id
        "#,
    )
    .bind(init.estate_id)
    .bind(&init.source_system)
    .bind(&init.source_event_id)
    .bind(&init.event_type)
    .bind(&init.repo_external_id)
    .bind(init.occurred_at)
    .bind(&init.dedup_key)
    .bind(&init.payload)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = inserted {
        return Ok(AppendOutcome { id, created: true });
    }

    // Lost the insert, the key is already present. This select runs as a new
    // statement with a fresh snapshot, so it also sees a row committed by a
    // concurrent worker mid-append.
    let id: i64 =
        sqlx::query_scalar("SELECT id FROM raw_events WHERE source_system = $1 AND dedup_key = $2")
            .bind(&init.source_system)
            .bind(&init.dedup_key)
            .fetch_one(&mut *conn)
            .await?;

    Ok(AppendOutcome { id, created: false })
}

pub async fn get_raw_event<'c, E>(executor: E, id: i64) -> Result<Option<RawEvent>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row: Option<RawEventRow> = sqlx::query_as(
        r#"
SELECT id, estate_id, source_system, source_event_id, event_type, repo_external_id,
       occurred_at, ingested_at, dedup_key, payload, transform_state, last_transform_error
FROM raw_events
WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(RawEvent::try_from(row)?)),
        None => Ok(None),
    }
}

/// Candidate scan over the pending queue, oldest first. Takes no locks; the
/// per-event claim is what makes concurrent draining safe.
pub async fn list_pending<'c, E>(executor: E, limit: i64) -> Result<Vec<RawEvent>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let rows: Vec<RawEventRow> = sqlx::query_as(
        r#"
SELECT id, estate_id, source_system, source_event_id, event_type, repo_external_id,
       occurred_at, ingested_at, dedup_key, payload, transform_state, last_transform_error
FROM raw_events
WHERE transform_state = 'pending'
ORDER BY id
LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| RawEvent::try_from(row).map_err(Into::into))
        .collect()
}

/// Re-select a pending row under lock, inside the caller's transaction.
/// Returns None when another worker holds the row or already finished it.
pub async fn claim_pending<'c, E>(executor: E, id: i64) -> Result<Option<RawEvent>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row: Option<RawEventRow> = sqlx::query_as(
        r#"
SELECT id, estate_id, source_system, source_event_id, event_type, repo_external_id,
       occurred_at, ingested_at, dedup_key, payload, transform_state, last_transform_error
FROM raw_events
WHERE id = $1 AND transform_state = 'pending'
FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(RawEvent::try_from(row)?)),
        None => Ok(None),
    }
}

pub async fn mark_processed<'c, E>(executor: E, id: i64) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        "UPDATE raw_events SET transform_state = 'processed', last_transform_error = NULL WHERE id = $1",
    )
    .bind(id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn mark_failed<'c, E>(executor: E, id: i64, error: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        "UPDATE raw_events SET transform_state = 'failed', last_transform_error = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn count_pending<'c, E>(executor: E, estate_id: Option<i32>) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_scalar(
        r#"
SELECT count(*) FROM raw_events
WHERE transform_state = 'pending' AND ($1::int4 IS NULL OR estate_id = $1)
        "#,
    )
    .bind(estate_id)
    .fetch_one(executor)
    .await?)
}
