// We do this pattern (privately use a module, then re-export parts of it) so we can
// refactor/rename or generally futz around with the internals without breaking the public API

// Types
mod types;
pub use types::CommitUpsert;
pub use types::DocChangeUpsert;
pub use types::EntityKind;
pub use types::Estate;
pub use types::EventStream;
pub use types::IngestionRun;
pub use types::IssueUpsert;
pub use types::PullRequestUpsert;
pub use types::RawEvent;
pub use types::RawEventInit;
pub use types::Repository;
pub use types::RunStatus;
pub use types::TransformState;
pub use types::Watermark;

// Errors
mod error;
pub use error::is_unique_violation;
pub use error::ParseError;
pub use error::SettingsError;
pub use error::StoreError;
pub use error::TimezoneRequiredError;

// Dedup key derivation
mod dedup;
pub use dedup::dedup_key;
pub use dedup::parse_occurrence_timestamp;

// Pool-holding stores for the poller side
mod store;
pub use store::RawEventStore;
pub use store::RunLedger;
pub use store::WatermarkManager;

// Executor-generic queries, for callers composing their own transactions
pub mod ops;
pub use ops::bronze::AppendOutcome;

// Per-estate settings
mod settings;
pub use settings::EstateSettings;
pub use settings::NoiseFilterSettings;
pub use settings::PgSettingsSource;
pub use settings::SettingsSource;
pub use settings::DEFAULT_DOC_PATH_PATTERNS;

// Ingestion health derivation
pub mod health;

// Retry policy for transient failures
mod retry;
pub use retry::RetryPolicy;
pub use retry::RetryPolicyBuilder;
