use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// The four upstream activity streams a repository is polled for. Each stream
/// has its own watermark row, so one slow stream never holds back the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStream {
    Commits,
    PullRequests,
    Issues,
    DocChanges,
}

impl EventStream {
    pub const ALL: [EventStream; 4] = [
        EventStream::Commits,
        EventStream::PullRequests,
        EventStream::Issues,
        EventStream::DocChanges,
    ];

    /// The event-type tag stamped on raw events appended from this stream.
    pub fn event_tag(self) -> &'static str {
        match self {
            EventStream::Commits => "commit",
            EventStream::PullRequests => "pull_request",
            EventStream::Issues => "issue",
            EventStream::DocChanges => "doc_change",
        }
    }
}

impl FromStr for EventStream {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commits" => Ok(EventStream::Commits),
            "pull_requests" => Ok(EventStream::PullRequests),
            "issues" => Ok(EventStream::Issues),
            "doc_changes" => Ok(EventStream::DocChanges),
            _ => Err(ParseError::InvalidEventStream(s.to_string())),
        }
    }
}

impl Display for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStream::Commits => write!(f, "commits"),
            EventStream::PullRequests => write!(f, "pull_requests"),
            EventStream::Issues => write!(f, "issues"),
            EventStream::DocChanges => write!(f, "doc_changes"),
        }
    }
}

/// Lifecycle of a raw event through the transform stage. Stored as TEXT, the
/// pending rows double as the transform work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformState {
    Pending,
    Processed,
    Failed,
}

impl FromStr for TransformState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransformState::Pending),
            "processed" => Ok(TransformState::Processed),
            "failed" => Ok(TransformState::Failed),
            _ => Err(ParseError::InvalidTransformState(s.to_string())),
        }
    }
}

impl Display for TransformState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformState::Pending => write!(f, "pending"),
            TransformState::Processed => write!(f, "processed"),
            TransformState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl FromStr for RunStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(ParseError::InvalidRunStatus(s.to_string())),
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The silver entity kinds an event fact can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Repository,
    Commit,
    PullRequest,
    Issue,
    DocChange,
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(EntityKind::Repository),
            "commit" => Ok(EntityKind::Commit),
            "pull_request" => Ok(EntityKind::PullRequest),
            "issue" => Ok(EntityKind::Issue),
            "doc_change" => Ok(EntityKind::DocChange),
            _ => Err(ParseError::InvalidEntityKind(s.to_string())),
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Repository => write!(f, "repository"),
            EntityKind::Commit => write!(f, "commit"),
            EntityKind::PullRequest => write!(f, "pull_request"),
            EntityKind::Issue => write!(f, "issue"),
            EntityKind::DocChange => write!(f, "doc_change"),
        }
    }
}

// The chunk of data needed to append a raw event. The event_type stays an
// uninterpreted tag here; only the transform stage decides whether it knows
// how to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventInit {
    pub estate_id: i32,
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub event_type: String,
    pub repo_external_id: String,
    pub occurred_at: DateTime<Utc>,
    pub dedup_key: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RawEvent {
    pub id: i64,
    pub estate_id: i32,
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub event_type: String,
    pub repo_external_id: String,
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub dedup_key: String,
    pub payload: serde_json::Value,
    pub transform_state: TransformState,
    pub last_transform_error: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct RawEventRow {
    pub id: i64,
    pub estate_id: i32,
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub event_type: String,
    pub repo_external_id: String,
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub dedup_key: String,
    pub payload: serde_json::Value,
    pub transform_state: String,
    pub last_transform_error: Option<String>,
}

impl TryFrom<RawEventRow> for RawEvent {
    type Error = ParseError;

    fn try_from(row: RawEventRow) -> Result<Self, Self::Error> {
        Ok(RawEvent {
            id: row.id,
            estate_id: row.estate_id,
            source_system: row.source_system,
            source_event_id: row.source_event_id,
            event_type: row.event_type,
            repo_external_id: row.repo_external_id,
            occurred_at: row.occurred_at,
            ingested_at: row.ingested_at,
            dedup_key: row.dedup_key,
            payload: row.payload,
            transform_state: row.transform_state.parse()?,
            last_transform_error: row.last_transform_error,
        })
    }
}

/// Per-repository, per-stream ingestion position. `ingested_at` is the
/// persisted watermark the next poll resumes from, `seen_at` the catch-up
/// high-water that only becomes the watermark once pagination completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub estate_id: i32,
    pub repo_external_id: String,
    pub stream: EventStream,
    pub ingested_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
    pub resume_cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct WatermarkRow {
    pub estate_id: i32,
    pub repo_external_id: String,
    pub stream: String,
    pub ingested_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
    pub resume_cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WatermarkRow> for Watermark {
    type Error = ParseError;

    fn try_from(row: WatermarkRow) -> Result<Self, Self::Error> {
        Ok(Watermark {
            estate_id: row.estate_id,
            repo_external_id: row.repo_external_id,
            stream: row.stream.parse()?,
            ingested_at: row.ingested_at,
            seen_at: row.seen_at,
            resume_cursor: row.resume_cursor,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestionRun {
    pub id: Uuid,
    pub estate_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct IngestionRunRow {
    pub id: Uuid,
    pub estate_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error: Option<String>,
}

impl TryFrom<IngestionRunRow> for IngestionRun {
    type Error = ParseError;

    fn try_from(row: IngestionRunRow) -> Result<Self, Self::Error> {
        Ok(IngestionRun {
            id: row.id,
            estate_id: row.estate_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: row.status.parse()?,
            error: row.error,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Estate {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Repository {
    pub id: i64,
    pub estate_id: i32,
    pub external_id: String,
    pub default_branch: String,
    pub ingestion_enabled: bool,
}

// Typed write shapes the transformers hand to the silver ops. Everything in
// these structs is derived from the event payload, never from wall-clock
// state, so replaying an event writes the exact same values.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitUpsert {
    pub sha: String,
    pub message: String,
    pub author_login: Option<String>,
    pub author_email: Option<String>,
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestUpsert {
    pub number: i64,
    pub title: String,
    pub author_login: Option<String>,
    pub state: String,
    pub labels: serde_json::Value,
    pub opened_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssueUpsert {
    pub number: i64,
    pub title: String,
    pub author_login: Option<String>,
    pub state: String,
    pub labels: serde_json::Value,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChangeUpsert {
    pub commit_id: i64,
    pub path: String,
    pub change_kind: String,
    pub changed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_and_state_tags_round_trip() {
        for stream in EventStream::ALL {
            assert_eq!(stream.to_string().parse::<EventStream>().unwrap(), stream);
        }
        assert_eq!(
            "processed".parse::<TransformState>().unwrap(),
            TransformState::Processed
        );
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert_eq!(
            "doc_change".parse::<EntityKind>().unwrap(),
            EntityKind::DocChange
        );
    }

    #[test]
    fn test_unknown_tags_are_rejected() {
        assert!("releases".parse::<EventStream>().is_err());
        assert!("PENDING".parse::<TransformState>().is_err());
        assert!("".parse::<RunStatus>().is_err());
    }
}
