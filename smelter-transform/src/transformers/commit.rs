use smelter_core::ops::silver;
use smelter_core::{EntityKind, RawEvent};
use sqlx::PgConnection;

use crate::error::TransformError;
use crate::types::CommitPayload;

pub async fn apply(conn: &mut PgConnection, event: &RawEvent) -> Result<(), TransformError> {
    let payload: CommitPayload = serde_json::from_value(event.payload.clone())?;

    let repository_id =
        silver::get_or_create_repository(&mut *conn, event.estate_id, &event.repo_external_id)
            .await?;

    // Completes a stub left by an out-of-order doc change, if one exists
    let commit_id = silver::upsert_commit(&mut *conn, repository_id, &payload.into_upsert()).await?;

    silver::record_event_fact(
        &mut *conn,
        event.id,
        repository_id,
        EntityKind::Commit,
        commit_id,
    )
    .await?;

    Ok(())
}
