pub const EVENTS_PROCESSED: &str = "smelter_transform_events_processed";
pub const EVENTS_FAILED: &str = "smelter_transform_events_failed";
pub const EVENTS_SKIPPED: &str = "smelter_transform_events_skipped";
pub const RACES_RECOVERED: &str = "smelter_transform_races_recovered";
pub const UNRECOGNIZED_EVENTS: &str = "smelter_transform_unrecognized_events";
pub const BATCH_CLAIMED: &str = "smelter_transform_batch_claimed";
pub const BATCH_TIME: &str = "smelter_transform_batch_time_ms";
