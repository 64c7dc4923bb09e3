use smelter_core::ops::silver;
use smelter_core::{DocChangeUpsert, EntityKind, RawEvent};
use sqlx::PgConnection;

use crate::error::TransformError;
use crate::types::DocChangePayload;

pub async fn apply(conn: &mut PgConnection, event: &RawEvent) -> Result<(), TransformError> {
    let payload: DocChangePayload = serde_json::from_value(event.payload.clone())?;

    let repository_id =
        silver::get_or_create_repository(&mut *conn, event.estate_id, &event.repo_external_id)
            .await?;

    // The referenced commit may not be ingested yet. A stub row preserves
    // the linkage; the real commit event later completes it in place.
    let commit_id =
        silver::ensure_commit_exists(&mut *conn, repository_id, &payload.commit_sha).await?;

    let upsert = DocChangeUpsert {
        commit_id,
        path: payload.path,
        change_kind: payload.change_kind,
        changed_at: payload.changed_at.or(Some(event.occurred_at)),
    };
    let doc_change_id = silver::upsert_doc_change(&mut *conn, repository_id, &upsert).await?;

    silver::record_event_fact(
        &mut *conn,
        event.id,
        repository_id,
        EntityKind::DocChange,
        doc_change_id,
    )
    .await?;

    Ok(())
}
