use smelter_core::ops::silver;
use smelter_core::{EntityKind, RawEvent};
use sqlx::PgConnection;

use crate::error::TransformError;
use crate::types::IssuePayload;

pub async fn apply(conn: &mut PgConnection, event: &RawEvent) -> Result<(), TransformError> {
    let payload: IssuePayload = serde_json::from_value(event.payload.clone())?;

    let repository_id =
        silver::get_or_create_repository(&mut *conn, event.estate_id, &event.repo_external_id)
            .await?;

    let issue_id = silver::upsert_issue(&mut *conn, repository_id, &payload.into_upsert()).await?;

    silver::record_event_fact(
        &mut *conn,
        event.id,
        repository_id,
        EntityKind::Issue,
        issue_id,
    )
    .await?;

    Ok(())
}
