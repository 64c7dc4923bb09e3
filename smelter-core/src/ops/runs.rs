//! The run ledger: one row per poller run, used by operators and by the
//! ingestion health derivation to tell "never ran" apart from "ran and broke".

use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{IngestionRun, IngestionRunRow};

pub async fn start_run<'c, E>(executor: E, estate_id: i32) -> Result<Uuid, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO ingestion_runs (id, estate_id, started_at, status) VALUES ($1, $2, now(), 'running')",
    )
    .bind(id)
    .bind(estate_id)
    .execute(executor)
    .await?;

    Ok(id)
}

pub async fn complete_run<'c, E>(executor: E, run_id: Uuid) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        "UPDATE ingestion_runs SET status = 'completed', finished_at = now() WHERE id = $1",
    )
    .bind(run_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn fail_run<'c, E>(executor: E, run_id: Uuid, error: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        "UPDATE ingestion_runs SET status = 'failed', finished_at = now(), error = $2 WHERE id = $1",
    )
    .bind(run_id)
    .bind(error)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get_run<'c, E>(executor: E, run_id: Uuid) -> Result<Option<IngestionRun>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row: Option<IngestionRunRow> = sqlx::query_as(
        "SELECT id, estate_id, started_at, finished_at, status, error FROM ingestion_runs WHERE id = $1",
    )
    .bind(run_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(IngestionRun::try_from(row)?)),
        None => Ok(None),
    }
}

pub async fn last_successful_run<'c, E>(
    executor: E,
    estate_id: i32,
) -> Result<Option<IngestionRun>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row: Option<IngestionRunRow> = sqlx::query_as(
        r#"
SELECT id, estate_id, started_at, finished_at, status, error
FROM ingestion_runs
WHERE estate_id = $1 AND status = 'completed'
ORDER BY started_at DESC
LIMIT 1
        "#,
    )
    .bind(estate_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(IngestionRun::try_from(row)?)),
        None => Ok(None),
    }
}
