use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use smelter_core::ops::bronze;
use smelter_core::{dedup_key, RawEventInit, RawEventStore, TransformState};
use smelter_transform::scheduler::Scheduler;
use sqlx::PgPool;

fn occurred() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().unwrap()
}

fn init(event_type: &str, payload: Value) -> RawEventInit {
    let key = dedup_key("github", event_type, None, "org/repo", occurred(), &payload);
    RawEventInit {
        estate_id: 1,
        source_system: "github".to_string(),
        source_event_id: None,
        event_type: event_type.to_string(),
        repo_external_id: "org/repo".to_string(),
        occurred_at: occurred(),
        dedup_key: key,
        payload,
    }
}

fn init_with_delivery(event_type: &str, delivery_id: &str, payload: Value) -> RawEventInit {
    let key = dedup_key(
        "github",
        event_type,
        Some(delivery_id),
        "org/repo",
        occurred(),
        &payload,
    );
    RawEventInit {
        source_event_id: Some(delivery_id.to_string()),
        dedup_key: key,
        ..init(event_type, payload)
    }
}

fn scheduler(db: &PgPool) -> Scheduler {
    Scheduler::new(db.clone(), 100, 4)
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_commit_event_lands_in_silver(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    let appended = events
        .append(&init(
            "commit",
            json!({
                "sha": "abc123",
                "message": "fix build",
                "author_login": "alice",
                "author_email": "alice@example.com",
                "authored_at": "2024-05-01T09:58:00Z",
            }),
        ))
        .await
        .unwrap();

    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);

    // First reference creates the repository with catalogue defaults
    let (external_id, default_branch): (String, String) =
        sqlx::query_as("SELECT external_id, default_branch FROM repositories")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(external_id, "org/repo");
    assert_eq!(default_branch, "main");

    let (message, author_login, is_stub): (String, Option<String>, bool) =
        sqlx::query_as("SELECT message, author_login, is_stub FROM commits WHERE sha = 'abc123'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(message, "fix build");
    assert_eq!(author_login.as_deref(), Some("alice"));
    assert!(!is_stub);

    let facts: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM event_facts WHERE raw_event_id = $1 AND entity_kind = 'commit'",
    )
    .bind(appended.id)
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(facts, 1);

    let event = events.get(appended.id).await.unwrap().unwrap();
    assert_eq!(event.transform_state, TransformState::Processed);
    assert_eq!(event.last_transform_error, None);
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_redelivered_event_rewrites_identical_rows(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    let payload = json!({
        "sha": "abc123",
        "message": "fix build",
        "authored_at": "2024-05-01T09:58:00Z",
    });

    events
        .append(&init_with_delivery("commit", "evt-1", payload.clone()))
        .await
        .unwrap();
    scheduler(&db).drain_batch().await.unwrap();

    let before: (i64, String, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT id, message, authored_at FROM commits WHERE sha = 'abc123'")
            .fetch_one(&db)
            .await
            .unwrap();

    // The same upstream change arrives again under a fresh delivery id, so
    // it slips past bronze dedup and replays through the transformer
    events
        .append(&init_with_delivery("commit", "evt-2", payload))
        .await
        .unwrap();
    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.processed, 1);

    let rows: Vec<(i64, String, Option<DateTime<Utc>>)> =
        sqlx::query_as("SELECT id, message, authored_at FROM commits WHERE sha = 'abc123'")
            .fetch_all(&db)
            .await
            .unwrap();
    assert_eq!(rows, vec![before]);
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_doc_change_before_commit_leaves_stub_then_completes(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    events
        .append(&init(
            "doc_change",
            json!({"commit_sha": "abc123", "path": "docs/setup.md", "change_kind": "added"}),
        ))
        .await
        .unwrap();
    scheduler(&db).drain_batch().await.unwrap();

    let (stub_id, message, is_stub): (i64, String, bool) =
        sqlx::query_as("SELECT id, message, is_stub FROM commits WHERE sha = 'abc123'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert!(is_stub);
    assert_eq!(message, "");

    let (commit_id, change_kind, changed_at): (i64, String, Option<DateTime<Utc>>) = sqlx::query_as(
        "SELECT commit_id, change_kind, changed_at FROM doc_changes WHERE path = 'docs/setup.md'",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(commit_id, stub_id);
    assert_eq!(change_kind, "added");
    // The payload carried no change timestamp, the event occurrence fills in
    assert_eq!(changed_at, Some(occurred()));

    // The real commit arrives later and completes the stub in place
    events
        .append(&init(
            "commit",
            json!({"sha": "abc123", "message": "document setup", "author_login": "bob"}),
        ))
        .await
        .unwrap();
    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.processed, 1);

    let rows: Vec<(i64, String, bool)> =
        sqlx::query_as("SELECT id, message, is_stub FROM commits WHERE sha = 'abc123'")
            .fetch_all(&db)
            .await
            .unwrap();
    assert_eq!(rows, vec![(stub_id, "document setup".to_string(), false)]);
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_unknown_event_type_fails_terminally(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    let appended = events
        .append(&init("release", json!({"tag": "v1.2.3"})))
        .await
        .unwrap();

    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processed, 0);

    let event = events.get(appended.id).await.unwrap().unwrap();
    assert_eq!(event.transform_state, TransformState::Failed);
    let error = event.last_transform_error.unwrap();
    assert!(error.contains("unrecognized event type"), "got: {error}");

    // Failed rows leave the queue, the next batch does not see them
    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.claimed, 0);
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_bad_payload_fails_alone_and_the_batch_continues(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    // No sha field, the commit payload cannot decode
    let bad = events
        .append(&init("commit", json!({"message": "no sha here"})))
        .await
        .unwrap();
    events
        .append(&init(
            "pull_request",
            json!({"number": 7, "title": "Add docs", "author_login": "carol", "labels": ["docs"]}),
        ))
        .await
        .unwrap();

    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.claimed, 2);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);

    let event = events.get(bad.id).await.unwrap().unwrap();
    assert_eq!(event.transform_state, TransformState::Failed);
    assert!(event.last_transform_error.is_some());

    let (title, state, labels): (String, String, Value) =
        sqlx::query_as("SELECT title, state, labels FROM pull_requests WHERE number = 7")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(title, "Add docs");
    assert_eq!(state, "open");
    assert_eq!(labels, json!(["docs"]));
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_issue_state_change_updates_in_place(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    events
        .append(&init(
            "issue",
            json!({
                "number": 42,
                "title": "Flaky test",
                "state": "open",
                "opened_at": "2024-05-01T09:00:00Z",
            }),
        ))
        .await
        .unwrap();
    scheduler(&db).drain_batch().await.unwrap();

    events
        .append(&init(
            "issue",
            json!({
                "number": 42,
                "title": "Flaky test",
                "state": "closed",
                "opened_at": "2024-05-01T09:00:00Z",
                "closed_at": "2024-05-02T16:30:00Z",
            }),
        ))
        .await
        .unwrap();
    scheduler(&db).drain_batch().await.unwrap();

    let rows: Vec<(String, Option<DateTime<Utc>>)> =
        sqlx::query_as("SELECT state, closed_at FROM issues WHERE number = 42")
            .fetch_all(&db)
            .await
            .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "closed");
    assert_eq!(rows[0].1, Some("2024-05-02T16:30:00Z".parse().unwrap()));
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_event_claimed_elsewhere_is_skipped_not_failed(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    let appended = events
        .append(&init("commit", json!({"sha": "abc123"})))
        .await
        .unwrap();

    // Another worker mid-transform holds the row lock
    let mut holder = db.begin().await.unwrap();
    bronze::claim_pending(&mut *holder, appended.id)
        .await
        .unwrap()
        .unwrap();

    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);

    holder.rollback().await.unwrap();

    // Released again, the next batch picks it up
    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.processed, 1);
}

#[sqlx::test(migrations = "../smelter-core/migrations")]
async fn test_concurrent_events_for_one_pull_request_leave_a_single_row(db: PgPool) {
    let events = RawEventStore::from_pool(db.clone());
    for delivery_id in ["evt-1", "evt-2", "evt-3", "evt-4"] {
        let payload = json!({"number": 7, "title": "Add docs", "state": "open"});
        events
            .append(&init_with_delivery("pull_request", delivery_id, payload))
            .await
            .unwrap();
    }

    let stats = scheduler(&db).drain_batch().await.unwrap();
    assert_eq!(stats.claimed, 4);
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 0);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM pull_requests")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 1);
    let repos: i64 = sqlx::query_scalar("SELECT count(*) FROM repositories")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(repos, 1);
}
