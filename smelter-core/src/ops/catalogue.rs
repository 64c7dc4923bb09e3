//! Reads over the catalogue tables. The estates and repositories rows are
//! owned by the external catalogue importer; the pipeline reads them to know
//! what to poll, and the transform side auto-creates repository rows it has
//! not seen yet.

use crate::error::StoreError;
use crate::types::{Estate, Repository};

pub async fn list_estates<'c, E>(executor: E) -> Result<Vec<Estate>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_as("SELECT id, name FROM estates ORDER BY id")
        .fetch_all(executor)
        .await?)
}

pub async fn list_enabled_repositories<'c, E>(
    executor: E,
    estate_id: i32,
) -> Result<Vec<Repository>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    Ok(sqlx::query_as(
        r#"
SELECT id, estate_id, external_id, default_branch, ingestion_enabled
FROM repositories
WHERE estate_id = $1 AND ingestion_enabled
ORDER BY external_id
        "#,
    )
    .bind(estate_id)
    .fetch_all(executor)
    .await?)
}
