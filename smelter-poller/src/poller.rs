use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use globset::GlobSet;
use smelter_core::ops::catalogue;
use smelter_core::{
    dedup_key, Estate, EstateSettings, EventStream, RawEventInit, RawEventStore, Repository,
    RetryPolicy, RetryPolicyBuilder, RunLedger, SettingsError, SettingsSource, StoreError,
    WatermarkManager,
};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::filter::{compile_globs, CandidateEvent, NoiseFilter};
use crate::metrics_consts::{
    DOC_PATHS_SKIPPED, EVENTS_APPENDED, EVENTS_DEDUPLICATED, EVENTS_SUPPRESSED, RUNS_COMPLETED,
    RUNS_FAILED, RUNS_STARTED, RUN_TIME, SETTINGS_FAIL_OPEN, SOURCE_FETCH_RETRIES,
    STREAMS_COMPLETED, STREAMS_FAILED, STREAMS_TRUNCATED,
};
use crate::source::{SourceClient, SourceError, SourcePage};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("estate settings are invalid: {0}")]
    InvalidSettings(SettingsError),
    #[error("estate settings contain a bad glob: {0}")]
    BadGlob(#[from] globset::Error),
    #[error("source rejected credentials: {0}")]
    Unauthorized(String),
}

// Errors local to one repository/stream are logged and counted; fatal ones
// abort the whole run.
enum StreamError {
    Fatal(PollError),
    Skipped(SourceError),
}

impl From<StoreError> for StreamError {
    fn from(err: StoreError) -> Self {
        StreamError::Fatal(PollError::Store(err))
    }
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub initial_lookback: ChronoDuration,
    pub steady_lookback: ChronoDuration,
    pub max_pages_per_stream: u32,
    pub fetch_retry: RetryPolicy,
}

impl PollerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_lookback: ChronoDuration::days(config.initial_lookback_days),
            steady_lookback: ChronoDuration::hours(config.steady_lookback_hours),
            max_pages_per_stream: config.max_pages_per_stream,
            fetch_retry: RetryPolicyBuilder::default()
                .max_attempts(config.fetch_max_attempts)
                .provide(),
        }
    }
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            initial_lookback: ChronoDuration::days(90),
            steady_lookback: ChronoDuration::hours(48),
            max_pages_per_stream: 20,
            fetch_retry: RetryPolicyBuilder::default().provide(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamOutcome {
    pub appended: u64,
    pub deduplicated: u64,
    pub suppressed: u64,
    pub doc_paths_skipped: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub repos_polled: usize,
    pub events_appended: u64,
    pub events_deduplicated: u64,
    pub events_suppressed: u64,
    pub streams_truncated: u64,
    pub streams_failed: u64,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            repos_polled: 0,
            events_appended: 0,
            events_deduplicated: 0,
            events_suppressed: 0,
            streams_truncated: 0,
            streams_failed: 0,
        }
    }

    fn absorb(&mut self, outcome: &StreamOutcome) {
        self.events_appended += outcome.appended;
        self.events_deduplicated += outcome.deduplicated;
        self.events_suppressed += outcome.suppressed;
        if outcome.truncated {
            self.streams_truncated += 1;
        }
    }
}

/// Drives bronze ingestion for one source system: walks every enabled
/// repository of an estate, stream by stream, appending deduplicated raw
/// events and advancing watermarks as pagination windows complete.
pub struct Poller {
    pool: PgPool,
    events: RawEventStore,
    watermarks: WatermarkManager,
    runs: RunLedger,
    settings: Arc<dyn SettingsSource>,
    source: Arc<dyn SourceClient>,
    options: PollerOptions,
}

impl Poller {
    pub fn new(
        pool: PgPool,
        settings: Arc<dyn SettingsSource>,
        source: Arc<dyn SourceClient>,
        options: PollerOptions,
    ) -> Self {
        Self {
            events: RawEventStore::from_pool(pool.clone()),
            watermarks: WatermarkManager::from_pool(pool.clone()),
            runs: RunLedger::from_pool(pool.clone()),
            pool,
            settings,
            source,
            options,
        }
    }

    pub async fn list_estates(&self) -> Result<Vec<Estate>, StoreError> {
        catalogue::list_estates(&self.pool).await
    }

    /// One full ingestion run for one estate, recorded in the run ledger.
    pub async fn run_estate(&self, estate: &Estate) -> Result<RunSummary, PollError> {
        let run_id = self.runs.start(estate.id).await?;
        info!(estate_id = estate.id, run_id = %run_id, "run.started");
        metrics::counter!(RUNS_STARTED).increment(1);
        let run_time = common_metrics::timing_guard(RUN_TIME, &[]);

        match self.drive_run(estate, run_id).await {
            Ok(summary) => {
                self.runs.complete(run_id).await?;
                info!(
                    estate_id = estate.id,
                    run_id = %run_id,
                    repos = summary.repos_polled,
                    appended = summary.events_appended,
                    deduplicated = summary.events_deduplicated,
                    suppressed = summary.events_suppressed,
                    truncated = summary.streams_truncated,
                    failed_streams = summary.streams_failed,
                    "run.completed"
                );
                metrics::counter!(RUNS_COMPLETED).increment(1);
                run_time.label("outcome", "completed").fin();
                Ok(summary)
            }
            Err(err) => {
                error!(estate_id = estate.id, run_id = %run_id, error = %err, "run.failed");
                metrics::counter!(RUNS_FAILED).increment(1);
                run_time.label("outcome", "failed").fin();
                if let Err(mark_err) = self.runs.fail(run_id, &err.to_string()).await {
                    error!(run_id = %run_id, error = %mark_err, "could not record run failure");
                }
                Err(err)
            }
        }
    }

    async fn drive_run(&self, estate: &Estate, run_id: Uuid) -> Result<RunSummary, PollError> {
        let settings = self.load_settings(estate.id).await?;
        let noise = NoiseFilter::from_settings(&settings.noise_filter)?;
        let doc_paths = compile_globs(&settings.doc_path_patterns)?;

        let repos = catalogue::list_enabled_repositories(&self.pool, estate.id).await?;
        let mut summary = RunSummary::new(run_id);

        for repo in &repos {
            summary.repos_polled += 1;
            for stream in EventStream::ALL {
                match self
                    .poll_repo_stream(estate.id, repo, stream, &noise, &doc_paths)
                    .await
                {
                    Ok(outcome) => {
                        summary.absorb(&outcome);
                        if outcome.truncated {
                            info!(
                                estate_id = estate.id,
                                repo = %repo.external_id,
                                stream = %stream,
                                appended = outcome.appended,
                                suppressed = outcome.suppressed,
                                "stream.truncated"
                            );
                            metrics::counter!(STREAMS_TRUNCATED).increment(1);
                        } else {
                            info!(
                                estate_id = estate.id,
                                repo = %repo.external_id,
                                stream = %stream,
                                appended = outcome.appended,
                                deduplicated = outcome.deduplicated,
                                suppressed = outcome.suppressed,
                                doc_paths_skipped = outcome.doc_paths_skipped,
                                "stream.completed"
                            );
                            metrics::counter!(STREAMS_COMPLETED).increment(1);
                        }
                    }
                    Err(StreamError::Fatal(err)) => return Err(err),
                    Err(StreamError::Skipped(err)) => {
                        warn!(
                            estate_id = estate.id,
                            repo = %repo.external_id,
                            stream = %stream,
                            error = %err,
                            "stream failed, run continues"
                        );
                        summary.streams_failed += 1;
                        metrics::counter!(STREAMS_FAILED).increment(1);
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn load_settings(&self, estate_id: i32) -> Result<EstateSettings, PollError> {
        match self.settings.estate_settings(estate_id).await {
            Ok(settings) => Ok(settings),
            // A flaky settings read must not stall ingestion, so poll
            // unfiltered and let a later run tighten things back up
            Err(SettingsError::Unavailable(err)) => {
                warn!(
                    estate_id,
                    error = %err,
                    "estate settings unavailable, ingesting unfiltered"
                );
                metrics::counter!(SETTINGS_FAIL_OPEN).increment(1);
                Ok(EstateSettings::default())
            }
            Err(err @ SettingsError::Invalid { .. }) => Err(PollError::InvalidSettings(err)),
        }
    }

    async fn poll_repo_stream(
        &self,
        estate_id: i32,
        repo: &Repository,
        stream: EventStream,
        noise: &NoiseFilter,
        doc_paths: &GlobSet,
    ) -> Result<StreamOutcome, StreamError> {
        let mark = self
            .watermarks
            .get(estate_id, &repo.external_id, stream)
            .await?;

        let now = Utc::now();
        let since = match &mark {
            Some(mark) => match mark.ingested_at {
                Some(persisted) => persisted,
                // Catch-up started once but never completed a window
                None => now - self.options.steady_lookback,
            },
            None => now - self.options.initial_lookback,
        };
        let mut cursor = mark.and_then(|mark| mark.resume_cursor);

        let mut outcome = StreamOutcome::default();
        let mut pages = 0u32;

        loop {
            let page = self
                .fetch_with_retry(&repo.external_id, stream, since, cursor.as_deref())
                .await?;
            pages += 1;

            let mut newest: Option<DateTime<Utc>> = None;
            for event in &page.items {
                // Suppressed items still move the watermark, otherwise a
                // window full of noise would be re-fetched every run
                newest = Some(newest.map_or(event.occurred_at, |n| n.max(event.occurred_at)));

                if stream == EventStream::DocChanges {
                    let is_doc = event
                        .path
                        .as_deref()
                        .is_some_and(|path| doc_paths.is_match(path));
                    if !is_doc {
                        outcome.doc_paths_skipped += 1;
                        metrics::counter!(DOC_PATHS_SKIPPED).increment(1);
                        continue;
                    }
                }

                let candidate = CandidateEvent {
                    author: event.author.as_deref(),
                    title: event.title.as_deref(),
                    labels: &event.labels,
                    path: event.path.as_deref(),
                };
                if noise.suppresses(&candidate) {
                    outcome.suppressed += 1;
                    metrics::counter!(EVENTS_SUPPRESSED).increment(1);
                    continue;
                }

                let source_system = self.source.source_system();
                let tag = stream.event_tag();
                let init = RawEventInit {
                    estate_id,
                    source_system: source_system.to_string(),
                    source_event_id: event.native_id.clone(),
                    event_type: tag.to_string(),
                    repo_external_id: repo.external_id.clone(),
                    occurred_at: event.occurred_at,
                    dedup_key: dedup_key(
                        source_system,
                        tag,
                        event.native_id.as_deref(),
                        &repo.external_id,
                        event.occurred_at,
                        &event.payload,
                    ),
                    payload: event.payload.clone(),
                };
                let appended = self.events.append(&init).await?;
                if appended.created {
                    outcome.appended += 1;
                    metrics::counter!(EVENTS_APPENDED).increment(1);
                } else {
                    outcome.deduplicated += 1;
                    metrics::counter!(EVENTS_DEDUPLICATED).increment(1);
                }
            }

            match page.next_cursor {
                Some(next) if pages >= self.options.max_pages_per_stream => {
                    // Page budget exhausted with more to fetch: hold the
                    // persisted watermark back and resume here next run
                    self.watermarks
                        .advance(estate_id, &repo.external_id, stream, newest, true)
                        .await?;
                    self.watermarks
                        .save_cursor(estate_id, &repo.external_id, stream, &next)
                        .await?;
                    outcome.truncated = true;
                    return Ok(outcome);
                }
                Some(next) => {
                    self.watermarks
                        .advance(estate_id, &repo.external_id, stream, newest, true)
                        .await?;
                    self.watermarks
                        .save_cursor(estate_id, &repo.external_id, stream, &next)
                        .await?;
                    cursor = Some(next);
                }
                None => {
                    self.watermarks
                        .advance(estate_id, &repo.external_id, stream, newest, false)
                        .await?;
                    return Ok(outcome);
                }
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        repo_external_id: &str,
        stream: EventStream,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<SourcePage, StreamError> {
        let mut attempt = 1;
        loop {
            match self
                .source
                .fetch_page(repo_external_id, stream, since, cursor)
                .await
            {
                Ok(page) => return Ok(page),
                Err(SourceError::Transient(reason)) => {
                    if !self.options.fetch_retry.should_retry(attempt) {
                        return Err(StreamError::Skipped(SourceError::Transient(reason)));
                    }
                    let pause = self.options.fetch_retry.retry_interval(attempt);
                    warn!(
                        repo = repo_external_id,
                        stream = %stream,
                        attempt,
                        error = %reason,
                        "transient source failure, retrying"
                    );
                    metrics::counter!(SOURCE_FETCH_RETRIES).increment(1);
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(SourceError::Unauthorized(reason)) => {
                    return Err(StreamError::Fatal(PollError::Unauthorized(reason)))
                }
                Err(err @ SourceError::Decode(_)) => return Err(StreamError::Skipped(err)),
            }
        }
    }
}
