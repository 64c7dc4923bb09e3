use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use smelter_core::{CommitUpsert, IssueUpsert, PullRequestUpsert};

// Typed views over the raw payloads the poller appended. Unknown fields are
// tolerated so upstream additions never break the transform stage; missing
// required fields are a terminal decode failure.

fn default_state() -> String {
    "open".to_string()
}

fn default_change_kind() -> String {
    "modified".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CommitPayload {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    pub author_login: Option<String>,
    pub author_email: Option<String>,
    pub authored_at: Option<DateTime<Utc>>,
}

impl CommitPayload {
    pub fn into_upsert(self) -> CommitUpsert {
        CommitUpsert {
            sha: self.sha,
            message: self.message,
            author_login: self.author_login,
            author_email: self.author_email,
            authored_at: self.authored_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: i64,
    #[serde(default)]
    pub title: String,
    pub author_login: Option<String>,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PullRequestPayload {
    pub fn into_upsert(self) -> PullRequestUpsert {
        PullRequestUpsert {
            number: self.number,
            title: self.title,
            author_login: self.author_login,
            state: self.state,
            labels: Value::from(self.labels),
            opened_at: self.opened_at,
            merged_at: self.merged_at,
            closed_at: self.closed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub number: i64,
    #[serde(default)]
    pub title: String,
    pub author_login: Option<String>,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl IssuePayload {
    pub fn into_upsert(self) -> IssueUpsert {
        IssueUpsert {
            number: self.number,
            title: self.title,
            author_login: self.author_login,
            state: self.state,
            labels: Value::from(self.labels),
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocChangePayload {
    pub commit_sha: String,
    pub path: String,
    #[serde(default = "default_change_kind")]
    pub change_kind: String,
    pub changed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_commit_payload_decodes_with_defaults() {
        let payload: CommitPayload = serde_json::from_value(json!({"sha": "abc123"})).unwrap();
        assert_eq!(payload.sha, "abc123");
        assert_eq!(payload.message, "");
        assert!(payload.author_login.is_none());
        assert!(payload.authored_at.is_none());
    }

    #[test]
    fn test_commit_payload_requires_a_sha() {
        let result =
            serde_json::from_value::<CommitPayload>(json!({"message": "no sha in sight"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let payload: CommitPayload = serde_json::from_value(json!({
            "sha": "abc123",
            "message": "fix",
            "html_url": "https://example.com/commit/abc123",
            "verification": {"verified": true}
        }))
        .unwrap();
        assert_eq!(payload.message, "fix");
    }

    #[test]
    fn test_pull_request_payload_full_round() {
        let payload: PullRequestPayload = serde_json::from_value(json!({
            "number": 42,
            "title": "Add frobnicator",
            "author_login": "octocat",
            "state": "merged",
            "labels": ["feature", "reviewed"],
            "opened_at": "2024-05-01T10:00:00Z",
            "merged_at": "2024-05-02T09:00:00Z"
        }))
        .unwrap();

        let upsert = payload.into_upsert();
        assert_eq!(upsert.number, 42);
        assert_eq!(upsert.state, "merged");
        assert_eq!(upsert.labels, json!(["feature", "reviewed"]));
        assert!(upsert.merged_at.is_some());
        assert!(upsert.closed_at.is_none());
    }

    #[test]
    fn test_pull_request_state_defaults_to_open() {
        let payload: PullRequestPayload =
            serde_json::from_value(json!({"number": 7})).unwrap();
        assert_eq!(payload.state, "open");
        assert!(payload.labels.is_empty());
    }

    #[test]
    fn test_doc_change_payload_needs_commit_and_path() {
        let ok: DocChangePayload = serde_json::from_value(json!({
            "commit_sha": "abc123",
            "path": "docs/guide.md"
        }))
        .unwrap();
        assert_eq!(ok.change_kind, "modified");

        let missing_path =
            serde_json::from_value::<DocChangePayload>(json!({"commit_sha": "abc123"}));
        assert!(missing_path.is_err());
    }
}
