use futures::stream::{self, StreamExt};
use smelter_core::ops::bronze;
use smelter_core::{RawEvent, RawEventStore, StoreError};
use sqlx::PgPool;
use tracing::{error, warn};

use crate::error::TransformError;
use crate::metrics_consts::{
    BATCH_CLAIMED, EVENTS_FAILED, EVENTS_PROCESSED, EVENTS_SKIPPED, RACES_RECOVERED,
    UNRECOGNIZED_EVENTS,
};
use crate::registry;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub claimed: usize,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub races_recovered: u64,
}

/// Drains pending raw events into silver entities. Safe to run in several
/// processes at once: the per-event claim is `FOR UPDATE SKIP LOCKED`, so
/// two workers never transform the same event concurrently.
pub struct Scheduler {
    pool: PgPool,
    events: RawEventStore,
    batch_size: i64,
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(pool: PgPool, batch_size: i64, max_concurrency: usize) -> Self {
        Self {
            events: RawEventStore::from_pool(pool.clone()),
            pool,
            batch_size,
            max_concurrency,
        }
    }

    /// Transform one batch of pending events. Events claimed by another
    /// worker in the meantime are skipped; a bad event is marked failed and
    /// the rest of the batch proceeds.
    pub async fn drain_batch(&self) -> Result<BatchStats, StoreError> {
        let pending = self.events.list_pending(self.batch_size).await?;
        let mut stats = BatchStats {
            claimed: pending.len(),
            ..BatchStats::default()
        };
        if pending.is_empty() {
            return Ok(stats);
        }
        metrics::gauge!(BATCH_CLAIMED).set(stats.claimed as f64);

        let outcomes: Vec<EventOutcome> = stream::iter(pending)
            .map(|event| {
                let pool = self.pool.clone();
                async move { process_event(&pool, event).await }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                EventOutcome::Processed => stats.processed += 1,
                EventOutcome::RaceRecovered => {
                    stats.processed += 1;
                    stats.races_recovered += 1;
                }
                EventOutcome::Skipped => stats.skipped += 1,
                EventOutcome::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

enum EventOutcome {
    Processed,
    RaceRecovered,
    Skipped,
    Failed,
}

async fn process_event(pool: &PgPool, event: RawEvent) -> EventOutcome {
    match transform_in_tx(pool, &event).await {
        Ok(true) => {
            metrics::counter!(EVENTS_PROCESSED).increment(1);
            EventOutcome::Processed
        }
        Ok(false) => {
            metrics::counter!(EVENTS_SKIPPED).increment(1);
            EventOutcome::Skipped
        }
        Err(err) if err.is_benign_race() => {
            // The winner already created the entity row; the rolled-back
            // loser settles its event and moves on
            metrics::counter!(RACES_RECOVERED).increment(1);
            match bronze::mark_processed(pool, event.id).await {
                Ok(()) => EventOutcome::RaceRecovered,
                Err(mark_err) => {
                    error!(
                        event_id = event.id,
                        error = %mark_err,
                        "could not settle race-recovered event"
                    );
                    EventOutcome::Failed
                }
            }
        }
        Err(err) => {
            if err.is_unrecognized() {
                metrics::counter!(UNRECOGNIZED_EVENTS).increment(1);
            }
            metrics::counter!(EVENTS_FAILED).increment(1);
            warn!(
                event_id = event.id,
                event_type = %event.event_type,
                error = %err,
                "event transform failed"
            );
            if let Err(mark_err) = bronze::mark_failed(pool, event.id, &err.to_string()).await {
                error!(
                    event_id = event.id,
                    error = %mark_err,
                    "could not record event failure"
                );
            }
            EventOutcome::Failed
        }
    }
}

/// All entity writes and the processed mark commit atomically. Returns false
/// when another worker holds or already settled the event.
async fn transform_in_tx(pool: &PgPool, event: &RawEvent) -> Result<bool, TransformError> {
    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    let Some(claimed) = bronze::claim_pending(&mut *tx, event.id).await? else {
        return Ok(false);
    };

    registry::dispatch(&mut *tx, &claimed).await?;
    bronze::mark_processed(&mut *tx, event.id).await?;
    tx.commit().await.map_err(StoreError::from)?;

    Ok(true)
}
