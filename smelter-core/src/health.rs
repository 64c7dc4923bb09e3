//! Ingestion health, derived from watermark and run-ledger state. The goal is
//! that an operator can answer "is ingestion stalled, and where" from one
//! endpoint without log archaeology.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::ops::{bronze, runs, silver, watermarks};
use crate::types::{EventStream, IngestionRun, Watermark};

#[derive(Debug, Clone, Serialize)]
pub struct StreamLag {
    pub repo_external_id: String,
    pub stream: EventStream,
    pub ingested_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
    pub catchup_in_progress: bool,
    pub seconds_since_touch: i64,
    pub stalled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoStubCount {
    pub repo_external_id: String,
    pub stub_commits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionHealth {
    pub estate_id: i32,
    pub generated_at: DateTime<Utc>,
    pub has_successful_run: bool,
    pub last_successful_run_at: Option<DateTime<Utc>>,
    pub pending_events: i64,
    pub oldest_watermark_age_seconds: Option<i64>,
    pub stalled: bool,
    pub streams: Vec<StreamLag>,
    pub stub_commits: Vec<RepoStubCount>,
}

/// Gather and classify the ingestion health picture for one estate.
pub async fn ingestion_health(
    pool: &PgPool,
    estate_id: i32,
    stalled_after: Duration,
) -> Result<IngestionHealth, StoreError> {
    let marks = watermarks::list_watermarks(pool, estate_id).await?;
    let last_run = runs::last_successful_run(pool, estate_id).await?;
    let pending = bronze::count_pending(pool, Some(estate_id)).await?;
    let stubs = silver::count_stub_commits(pool, estate_id).await?;

    Ok(classify(
        estate_id,
        Utc::now(),
        &marks,
        last_run.as_ref(),
        pending,
        stubs,
        stalled_after,
    ))
}

/// Pure classification over gathered state. A stream is stalled when nothing
/// has touched its watermark row within the threshold; the estate is stalled
/// when any stream is, or when it has never completed a run at all.
pub fn classify(
    estate_id: i32,
    now: DateTime<Utc>,
    marks: &[Watermark],
    last_run: Option<&IngestionRun>,
    pending_events: i64,
    stub_counts: Vec<(String, i64)>,
    stalled_after: Duration,
) -> IngestionHealth {
    let has_successful_run = last_run.is_some();
    let last_successful_run_at = last_run.and_then(|run| run.finished_at);

    let mut streams = Vec::with_capacity(marks.len());
    let mut oldest_watermark_age_seconds: Option<i64> = None;
    let mut any_stream_stalled = false;

    for mark in marks {
        let seconds_since_touch = (now - mark.updated_at).num_seconds();
        let stalled = seconds_since_touch > stalled_after.num_seconds();
        any_stream_stalled |= stalled;

        if let Some(ingested_at) = mark.ingested_at {
            let age = (now - ingested_at).num_seconds();
            oldest_watermark_age_seconds =
                Some(oldest_watermark_age_seconds.map_or(age, |oldest| oldest.max(age)));
        }

        streams.push(StreamLag {
            repo_external_id: mark.repo_external_id.clone(),
            stream: mark.stream,
            ingested_at: mark.ingested_at,
            seen_at: mark.seen_at,
            catchup_in_progress: mark.resume_cursor.is_some(),
            seconds_since_touch,
            stalled,
        });
    }

    IngestionHealth {
        estate_id,
        generated_at: now,
        has_successful_run,
        last_successful_run_at,
        pending_events,
        oldest_watermark_age_seconds,
        stalled: !has_successful_run || any_stream_stalled,
        streams,
        stub_commits: stub_counts
            .into_iter()
            .map(|(repo_external_id, stub_commits)| RepoStubCount {
                repo_external_id,
                stub_commits,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use uuid::Uuid;

    fn mark(repo: &str, stream: EventStream, touched_secs_ago: i64, now: DateTime<Utc>) -> Watermark {
        Watermark {
            estate_id: 1,
            repo_external_id: repo.to_string(),
            stream,
            ingested_at: Some(now - Duration::hours(2)),
            seen_at: Some(now - Duration::hours(2)),
            resume_cursor: None,
            updated_at: now - Duration::seconds(touched_secs_ago),
        }
    }

    fn completed_run(now: DateTime<Utc>) -> IngestionRun {
        IngestionRun {
            id: Uuid::now_v7(),
            estate_id: 1,
            started_at: now - Duration::minutes(10),
            finished_at: Some(now - Duration::minutes(9)),
            status: RunStatus::Completed,
            error: None,
        }
    }

    #[test]
    fn test_fresh_marks_and_a_run_are_healthy() {
        let now = Utc::now();
        let marks = vec![
            mark("org/repo", EventStream::Commits, 30, now),
            mark("org/repo", EventStream::Issues, 45, now),
        ];
        let run = completed_run(now);

        let health = classify(1, now, &marks, Some(&run), 3, vec![], Duration::hours(1));

        assert!(!health.stalled);
        assert!(health.has_successful_run);
        assert_eq!(health.pending_events, 3);
        assert_eq!(health.streams.len(), 2);
        assert!(health.streams.iter().all(|s| !s.stalled));
        assert_eq!(health.oldest_watermark_age_seconds, Some(7200));
    }

    #[test]
    fn test_untouched_stream_goes_stalled() {
        let now = Utc::now();
        let marks = vec![
            mark("org/repo", EventStream::Commits, 30, now),
            mark("org/repo", EventStream::DocChanges, 2 * 3600, now),
        ];
        let run = completed_run(now);

        let health = classify(1, now, &marks, Some(&run), 0, vec![], Duration::hours(1));

        assert!(health.stalled);
        let stalled: Vec<_> = health.streams.iter().filter(|s| s.stalled).collect();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].stream, EventStream::DocChanges);
    }

    #[test]
    fn test_no_successful_run_is_stalled_even_when_fresh() {
        let now = Utc::now();
        let marks = vec![mark("org/repo", EventStream::Commits, 10, now)];

        let health = classify(1, now, &marks, None, 0, vec![], Duration::hours(1));

        assert!(health.stalled);
        assert!(!health.has_successful_run);
        assert!(health.streams.iter().all(|s| !s.stalled));
    }

    #[test]
    fn test_resume_cursor_reports_catchup_in_progress() {
        let now = Utc::now();
        let mut pending = mark("org/repo", EventStream::Commits, 10, now);
        pending.resume_cursor = Some("page-7".to_string());

        let health = classify(
            1,
            now,
            &[pending],
            Some(&completed_run(now)),
            0,
            vec![("org/repo".to_string(), 4)],
            Duration::hours(1),
        );

        assert!(health.streams[0].catchup_in_progress);
        assert_eq!(health.stub_commits.len(), 1);
        assert_eq!(health.stub_commits[0].stub_commits, 4);
    }
}
