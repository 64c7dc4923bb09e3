use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ops::bronze::{self, AppendOutcome};
use crate::ops::{runs, watermarks};
use crate::types::{EventStream, IngestionRun, RawEvent, RawEventInit, Watermark};

/// The poller's handle on the append-only raw event log.
#[derive(Clone)]
pub struct RawEventStore {
    pool: PgPool,
}

impl RawEventStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an event, deduplicating on `(source_system, dedup_key)`. The
    /// returned outcome says whether this call created the row, so callers
    /// can count duplicates without a second query.
    pub async fn append(&self, init: &RawEventInit) -> Result<AppendOutcome, StoreError> {
        bronze::append_raw_event(&self.pool, init).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<RawEvent>, StoreError> {
        bronze::get_raw_event(&self.pool, id).await
    }

    pub async fn list_pending(&self, limit: i64) -> Result<Vec<RawEvent>, StoreError> {
        bronze::list_pending(&self.pool, limit).await
    }

    pub async fn mark_processed(&self, id: i64) -> Result<(), StoreError> {
        bronze::mark_processed(&self.pool, id).await
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        bronze::mark_failed(&self.pool, id, error).await
    }

    pub async fn pending_count(&self, estate_id: Option<i32>) -> Result<i64, StoreError> {
        bronze::count_pending(&self.pool, estate_id).await
    }
}

/// The poller's handle on per-repository, per-stream ingestion positions.
/// Only the poller mutates watermarks; the transform stage never touches them.
#[derive(Clone)]
pub struct WatermarkManager {
    pool: PgPool,
}

impl WatermarkManager {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        estate_id: i32,
        repo_external_id: &str,
        stream: EventStream,
    ) -> Result<Option<Watermark>, StoreError> {
        watermarks::get_watermark(&self.pool, estate_id, repo_external_id, stream).await
    }

    /// Advance ingestion progress. While `backlog_active` only the catch-up
    /// high-water moves; once the window completes the persisted watermark
    /// takes the high-water and the resume cursor is cleared.
    pub async fn advance(
        &self,
        estate_id: i32,
        repo_external_id: &str,
        stream: EventStream,
        observed_at: Option<DateTime<Utc>>,
        backlog_active: bool,
    ) -> Result<(), StoreError> {
        match (backlog_active, observed_at) {
            (true, Some(observed)) => {
                watermarks::record_seen(&self.pool, estate_id, repo_external_id, stream, observed)
                    .await
            }
            // A batch that observed nothing has nothing to record mid-backlog
            (true, None) => Ok(()),
            (false, observed) => {
                watermarks::complete_catchup(
                    &self.pool,
                    estate_id,
                    repo_external_id,
                    stream,
                    observed,
                )
                .await
            }
        }
    }

    pub async fn save_cursor(
        &self,
        estate_id: i32,
        repo_external_id: &str,
        stream: EventStream,
        cursor: &str,
    ) -> Result<(), StoreError> {
        watermarks::save_cursor(&self.pool, estate_id, repo_external_id, stream, cursor).await
    }

    pub async fn list(&self, estate_id: i32) -> Result<Vec<Watermark>, StoreError> {
        watermarks::list_watermarks(&self.pool, estate_id).await
    }
}

/// One ledger row per poller run.
#[derive(Clone)]
pub struct RunLedger {
    pool: PgPool,
}

impl RunLedger {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn start(&self, estate_id: i32) -> Result<Uuid, StoreError> {
        runs::start_run(&self.pool, estate_id).await
    }

    pub async fn complete(&self, run_id: Uuid) -> Result<(), StoreError> {
        runs::complete_run(&self.pool, run_id).await
    }

    pub async fn fail(&self, run_id: Uuid, error: &str) -> Result<(), StoreError> {
        runs::fail_run(&self.pool, run_id, error).await
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<IngestionRun>, StoreError> {
        runs::get_run(&self.pool, run_id).await
    }

    pub async fn last_successful(&self, estate_id: i32) -> Result<Option<IngestionRun>, StoreError> {
        runs::last_successful_run(&self.pool, estate_id).await
    }
}
