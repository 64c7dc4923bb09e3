use std::time::Duration;

use chrono::{DateTime, Utc};
use httpmock::{Method, MockServer};
use serde_json::json;
use smelter_core::EventStream;
use smelter_poller::source::{RestSourceClient, SourceClient, SourceError};

fn client(server: &MockServer) -> RestSourceClient {
    RestSourceClient::new(
        &server.base_url(),
        "sekrit",
        "github",
        50,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn since() -> DateTime<Utc> {
    "2024-05-01T00:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn test_fetch_page_decodes_events_and_cursor() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(Method::GET)
            .path("/api/streams/commits")
            .query_param("repo", "org/repo")
            .query_param("since", "2024-05-01T00:00:00Z")
            .query_param("per_page", "50")
            .header("authorization", "Bearer sekrit");
        then.status(200).json_body(json!({
            "events": [
                {
                    "id": "abc123",
                    "occurred_at": "2024-05-02T10:00:00Z",
                    "author": "octocat",
                    "payload": {"sha": "abc123", "message": "fix build"}
                },
                {
                    "occurred_at": "2024-05-02T11:00:00+02:00",
                    "labels": ["bug"],
                    "payload": {"sha": "def456"}
                }
            ],
            "next_cursor": "page-2"
        }));
    });

    let page = client(&server)
        .fetch_page("org/repo", EventStream::Commits, since(), None)
        .await
        .unwrap();

    mock.assert();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.next_cursor.as_deref(), Some("page-2"));

    assert_eq!(page.items[0].native_id.as_deref(), Some("abc123"));
    assert_eq!(page.items[0].author.as_deref(), Some("octocat"));
    assert_eq!(page.items[0].payload["message"], "fix build");

    // Offset timestamps normalize to UTC
    assert!(page.items[1].native_id.is_none());
    assert_eq!(
        page.items[1].occurred_at,
        "2024-05-02T09:00:00Z".parse::<DateTime<Utc>>().unwrap()
    );
    assert_eq!(page.items[1].labels, vec!["bug".to_string()]);
}

#[tokio::test]
async fn test_cursor_is_round_tripped() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(Method::GET)
            .path("/api/streams/pull_requests")
            .query_param("cursor", "page-2");
        then.status(200).json_body(json!({"events": []}));
    });

    let page = client(&server)
        .fetch_page(
            "org/repo",
            EventStream::PullRequests,
            since(),
            Some("page-2"),
        )
        .await
        .unwrap();

    mock.assert();
    assert!(page.items.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_item_without_timezone_is_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::GET).path("/api/streams/commits");
        then.status(200).json_body(json!({
            "events": [
                {"occurred_at": "2024-05-02T10:00:00", "payload": {}},
                {"occurred_at": "2024-05-02T10:00:00Z", "payload": {}}
            ]
        }));
    });

    let page = client(&server)
        .fetch_page("org/repo", EventStream::Commits, since(), None)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_status_codes_classify_to_error_kinds() {
    let cases = [
        (401, "unauthorized"),
        (429, "transient"),
        (503, "transient"),
        (400, "decode"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/api/streams/issues");
            then.status(status);
        });

        let err = client(&server)
            .fetch_page("org/repo", EventStream::Issues, since(), None)
            .await
            .unwrap_err();

        let kind = match err {
            SourceError::Unauthorized(_) => "unauthorized",
            SourceError::Transient(_) => "transient",
            SourceError::Decode(_) => "decode",
        };
        assert_eq!(kind, expected, "status {} misclassified", status);
    }
}

#[tokio::test]
async fn test_garbage_body_is_a_decode_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::GET).path("/api/streams/doc_changes");
        then.status(200).body("not json");
    });

    let err = client(&server)
        .fetch_page("org/repo", EventStream::DocChanges, since(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Decode(_)));
}
