use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use smelter_core::{parse_occurrence_timestamp, EventStream};
use tracing::warn;

use super::{SourceClient, SourceError, SourceEvent, SourcePage};

#[derive(Deserialize)]
struct WireEvent {
    id: Option<String>,
    occurred_at: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    path: Option<String>,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct WirePage {
    events: Vec<WireEvent>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Talks to the collector gateway's stream endpoints. Pages look like
/// `GET {base}/api/streams/{stream}?repo=...&since=...&per_page=...&cursor=...`
/// and return `{ "events": [...], "next_cursor": "..." }`.
pub struct RestSourceClient {
    base_url: String,
    token: String,
    source_system: String,
    page_size: u32,
    client: Client,
}

impl RestSourceClient {
    pub fn new(
        base_url: &str,
        token: &str,
        source_system: &str,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            source_system: source_system.to_string(),
            page_size,
            client,
        })
    }
}

#[async_trait]
impl SourceClient for RestSourceClient {
    fn source_system(&self) -> &str {
        &self.source_system
    }

    async fn fetch_page(
        &self,
        repo_external_id: &str,
        stream: EventStream,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let url = format!("{}/api/streams/{}", self.base_url, stream);
        let since_param = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let per_page = self.page_size.to_string();

        let mut request = self.client.get(&url).query(&[
            ("repo", repo_external_id),
            ("since", since_param.as_str()),
            ("per_page", per_page.as_str()),
        ]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let page: WirePage = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let mut items = Vec::with_capacity(page.events.len());
        for event in page.events {
            // A single unusable item must not sink the whole page
            let occurred_at = match parse_occurrence_timestamp(&event.occurred_at) {
                Ok(occurred_at) => occurred_at,
                Err(err) => {
                    warn!(
                        repo = repo_external_id,
                        stream = %stream,
                        error = %err,
                        "skipping event with unusable timestamp"
                    );
                    continue;
                }
            };
            items.push(SourceEvent {
                native_id: event.id,
                occurred_at,
                payload: event.payload,
                author: event.author,
                title: event.title,
                labels: event.labels,
                path: event.path,
            });
        }

        Ok(SourcePage {
            items,
            next_cursor: page.next_cursor,
        })
    }
}

fn classify_request_error(error: reqwest::Error) -> SourceError {
    if error.is_decode() {
        SourceError::Decode(error.to_string())
    } else {
        // Timeouts, connection resets and friends are all worth a retry
        SourceError::Transient(error.to_string())
    }
}

fn classify_status(status: StatusCode) -> SourceError {
    match status.as_u16() {
        401 | 403 => SourceError::Unauthorized(format!("source returned {}", status)),
        408 | 429 => SourceError::Transient(format!("source returned {}", status)),
        s if s >= 500 => SourceError::Transient(format!("source returned {}", status)),
        _ => SourceError::Decode(format!("unexpected source status {}", status)),
    }
}
