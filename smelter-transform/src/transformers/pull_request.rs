use smelter_core::ops::silver;
use smelter_core::{EntityKind, RawEvent};
use sqlx::PgConnection;

use crate::error::TransformError;
use crate::types::PullRequestPayload;

pub async fn apply(conn: &mut PgConnection, event: &RawEvent) -> Result<(), TransformError> {
    let payload: PullRequestPayload = serde_json::from_value(event.payload.clone())?;

    let repository_id =
        silver::get_or_create_repository(&mut *conn, event.estate_id, &event.repo_external_id)
            .await?;

    let pull_request_id =
        silver::upsert_pull_request(&mut *conn, repository_id, &payload.into_upsert()).await?;

    silver::record_event_fact(
        &mut *conn,
        event.id,
        repository_id,
        EntityKind::PullRequest,
        pull_request_id,
    )
    .await?;

    Ok(())
}
