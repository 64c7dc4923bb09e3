use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smelter_core::EventStream;
use thiserror::Error;

pub mod rest;

pub use rest::RestSourceClient;

#[derive(Debug, Error)]
pub enum SourceError {
    // Worth retrying: timeouts, connection resets, rate limits, 5xx
    #[error("transient source failure: {0}")]
    Transient(String),
    // Aborts the whole run, retrying cannot help until credentials change
    #[error("source rejected credentials: {0}")]
    Unauthorized(String),
    #[error("source response did not decode: {0}")]
    Decode(String),
}

/// One event as the upstream source reports it, before deduplication.
/// `payload` is carried untouched into the raw store; the remaining fields
/// exist so the poller can filter and watermark without interpreting it.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub native_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub author: Option<String>,
    pub title: Option<String>,
    pub labels: Vec<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourcePage {
    pub items: Vec<SourceEvent>,
    pub next_cursor: Option<String>,
}

/// Paginated access to one source system's activity streams. The poller is
/// the sole consumer; `cursor` is opaque and round-tripped verbatim, which
/// lets an implementation resume mid-window after a restart.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source_system(&self) -> &str;

    async fn fetch_page(
        &self,
        repo_external_id: &str,
        stream: EventStream,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError>;
}
