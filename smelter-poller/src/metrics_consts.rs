pub const RUNS_STARTED: &str = "smelter_poller_runs_started";
pub const RUNS_COMPLETED: &str = "smelter_poller_runs_completed";
pub const RUNS_FAILED: &str = "smelter_poller_runs_failed";
pub const STREAMS_COMPLETED: &str = "smelter_poller_streams_completed";
pub const STREAMS_TRUNCATED: &str = "smelter_poller_streams_truncated";
pub const STREAMS_FAILED: &str = "smelter_poller_streams_failed";
pub const EVENTS_APPENDED: &str = "smelter_poller_events_appended";
pub const EVENTS_DEDUPLICATED: &str = "smelter_poller_events_deduplicated";
pub const EVENTS_SUPPRESSED: &str = "smelter_poller_events_suppressed";
pub const DOC_PATHS_SKIPPED: &str = "smelter_poller_doc_paths_skipped";
pub const SOURCE_FETCH_RETRIES: &str = "smelter_poller_source_fetch_retries";
pub const SETTINGS_FAIL_OPEN: &str = "smelter_poller_settings_fail_open";
pub const RUN_TIME: &str = "smelter_poller_run_time_ms";
pub const MAIN_LOOP_TIME: &str = "smelter_poller_main_loop_time_ms";
