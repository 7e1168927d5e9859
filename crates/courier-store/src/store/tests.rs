use super::{body_hash, message_key, Store};
use chrono::{Duration, Utc};
use courier_core::message::{CanonicalMessage, DedupPolicy, Direction, MonitorRule, SourceVintage};
use courier_core::CourierError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// Create an in-memory store for testing.
async fn test_store() -> Store {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .unwrap();
    Store::run_migrations(&pool).await.unwrap();
    Store { pool }
}

fn message(message_id: Option<&str>, chat_id: &str, body: &str) -> CanonicalMessage {
    let is_group = chat_id.ends_with("@g.us");
    CanonicalMessage {
        message_id: message_id.map(String::from),
        session_id: "wa-main".to_string(),
        chat_id: chat_id.to_string(),
        is_group,
        group_id: is_group.then(|| chat_id.to_string()),
        group_name: None,
        to_address: Some(chat_id.to_string()),
        sender_id: "5511999887766@c.us".to_string(),
        direction: Direction::Incoming,
        body: body.to_string(),
        occurred_at: Utc::now(),
        ingested_at: Utc::now(),
        source_vintage: SourceVintage::Live,
    }
}

fn rule(rule_id: &str, group_id: Option<&str>, keywords: &[&str]) -> MonitorRule {
    MonitorRule {
        rule_id: rule_id.to_string(),
        owner_id: "owner1".to_string(),
        group_id: group_id.map(String::from),
        group_name: Some("Ops Room".to_string()),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        is_active: true,
        total_messages: 0,
        last_activity: None,
    }
}

#[tokio::test]
async fn test_redelivery_of_same_message_id_keeps_one_row() {
    let store = test_store().await;
    let policy = DedupPolicy::default();
    let msg = message(Some("abc123"), "5511@c.us", "hello");

    assert!(store.append_incoming(&msg, &policy).await.unwrap());
    assert!(!store.append_incoming(&msg, &policy).await.unwrap());
    assert!(!store.append_incoming(&msg, &policy).await.unwrap());

    assert_eq!(store.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_distinct_message_ids_both_stored() {
    let store = test_store().await;
    let policy = DedupPolicy::default();

    assert!(store
        .append_incoming(&message(Some("m1"), "5511@c.us", "one"), &policy)
        .await
        .unwrap());
    assert!(store
        .append_incoming(&message(Some("m2"), "5511@c.us", "two"), &policy)
        .await
        .unwrap());
    assert_eq!(store.message_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_object_artifact_chat_id_rejected_without_write() {
    let store = test_store().await;
    let policy = DedupPolicy::default();
    let msg = message(Some("m1"), "[object Object]", "hello");

    let err = store.append_incoming(&msg, &policy).await.unwrap_err();
    assert!(matches!(err, CourierError::InvalidIdentifier(_)));
    assert_eq!(store.message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_object_artifact_message_id_rejected() {
    let store = test_store().await;
    let policy = DedupPolicy::default();
    let msg = message(Some("[object Object]"), "5511@c.us", "hello");

    let err = store.append_incoming(&msg, &policy).await.unwrap_err();
    assert!(matches!(err, CourierError::InvalidIdentifier(_)));
    assert_eq!(store.message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_idless_duplicate_inside_window_discarded() {
    let store = test_store().await;
    let policy = DedupPolicy::default(); // 4h window

    let mut first = message(None, "5511@c.us", "same text");
    first.occurred_at = Utc::now() - Duration::hours(2);
    assert!(store.append_incoming(&first, &policy).await.unwrap());

    // Same tuple 2 hours later: inside the 4h window, discarded.
    let second = message(None, "5511@c.us", "same  TEXT");
    assert!(!store.append_incoming(&second, &policy).await.unwrap());
    assert_eq!(store.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_refresh_mode_shrinks_window_and_accepts() {
    let store = test_store().await;
    let policy = DedupPolicy {
        refresh_mode: true,
        duplicate_window_hours: 4,
    };

    let mut first = message(None, "5511@c.us", "same text");
    first.occurred_at = Utc::now() - Duration::hours(2);
    assert!(store.append_incoming(&first, &policy).await.unwrap());

    // 2 hours is outside the shrunk 1h window: accepted as new.
    let second = message(None, "5511@c.us", "same text");
    assert!(store.append_incoming(&second, &policy).await.unwrap());
    assert_eq!(store.message_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_empty_message_id_falls_back_to_content_dedup() {
    let store = test_store().await;
    let policy = DedupPolicy::default();

    assert!(store
        .append_incoming(&message(Some(""), "5511@c.us", "hello"), &policy)
        .await
        .unwrap());
    // Redelivery with the still-empty id dedups on content, not on the
    // empty string colliding in the unique index.
    assert!(!store
        .append_incoming(&message(Some(""), "5511@c.us", "hello"), &policy)
        .await
        .unwrap());
    assert!(store
        .append_incoming(&message(Some(""), "5511@c.us", "different"), &policy)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_query_range_covers_both_timestamp_columns() {
    let store = test_store().await;
    let policy = DedupPolicy::default();
    let now = Utc::now();

    // A modern row (canonical `timestamp` column).
    let mut modern = message(Some("new1"), "5511@c.us", "modern row");
    modern.occurred_at = now - Duration::minutes(30);
    store.append_incoming(&modern, &policy).await.unwrap();

    // A legacy row that only ever had `created_at`.
    sqlx::query(
        "INSERT INTO messages (id, session_id, chat_id, sender_id, body, body_hash, created_at) \
         VALUES ('legacy1', 'wa-main', '5511@c.us', 'x@c.us', 'legacy row', ?, ?)",
    )
    .bind(body_hash("legacy row"))
    .bind(super::ts(&(now - Duration::hours(1))))
    .execute(store.pool())
    .await
    .unwrap();

    let rows = store
        .query_range("5511@c.us", &(now - Duration::hours(2)), &now)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2, "must match rows from either column");
    // Ascending by resolved event time: the legacy row is older.
    assert_eq!(rows[0].body, "legacy row");
    assert_eq!(rows[1].body, "modern row");
}

#[tokio::test]
async fn test_query_range_excludes_outside_window() {
    let store = test_store().await;
    let policy = DedupPolicy::default();
    let now = Utc::now();

    let mut old = message(Some("old1"), "5511@c.us", "too old");
    old.occurred_at = now - Duration::hours(10);
    store.append_incoming(&old, &policy).await.unwrap();

    let rows = store
        .query_range("5511@c.us", &(now - Duration::hours(2)), &now)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_fallback_query_widens_and_matches_alternate_keys() {
    let store = test_store().await;
    let now = Utc::now();

    // History exists, but keyed by group_id with an event time just
    // outside the requested window.
    sqlx::query(
        "INSERT INTO messages \
         (id, session_id, chat_id, is_group, group_id, sender_id, body, body_hash, timestamp) \
         VALUES ('g1', 'wa-main', 'weird-key', 1, '120363@g.us', 'x@c.us', 'group chatter', ?, ?)",
    )
    .bind(body_hash("group chatter"))
    .bind(super::ts(&(now - Duration::hours(3))))
    .execute(store.pool())
    .await
    .unwrap();

    let start = now - Duration::hours(2);
    let primary = store.query_range("120363@g.us", &start, &now).await.unwrap();
    assert!(primary.is_empty(), "primary window misses the row");

    let rows = store
        .query_range_with_fallback("120363@g.us", Some("120363@g.us"), None, &start, &now)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].body, "group chatter");
}

#[tokio::test]
async fn test_fallback_query_stays_empty_for_unknown_chat() {
    let store = test_store().await;
    let now = Utc::now();
    let rows = store
        .query_range_with_fallback("ghost@g.us", None, None, &(now - Duration::hours(1)), &now)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_rule_crud_and_active_filter() {
    let store = test_store().await;
    store
        .upsert_rule(&rule("r1", Some("120363@g.us"), &["urgent"]))
        .await
        .unwrap();
    store
        .upsert_rule(&rule("r2", Some("other@g.us"), &["deploy"]))
        .await
        .unwrap();

    assert_eq!(store.active_rules().await.unwrap().len(), 2);

    assert!(store.set_rule_active("r2", false).await.unwrap());
    let active = store.active_rules().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, "r1");
    assert_eq!(active[0].keywords, vec!["urgent".to_string()]);

    assert!(store.delete_rule("r1").await.unwrap());
    assert!(!store.delete_rule("r1").await.unwrap());
}

#[tokio::test]
async fn test_upsert_rule_preserves_stats() {
    let store = test_store().await;
    store
        .upsert_rule(&rule("r1", Some("g@g.us"), &["urgent"]))
        .await
        .unwrap();
    store.bump_rule_stats("r1").await.unwrap();
    store.bump_rule_stats("r1").await.unwrap();

    // Reconfigure the keywords; stats must survive.
    store
        .upsert_rule(&rule("r1", Some("g@g.us"), &["urgent", "blocker"]))
        .await
        .unwrap();

    let rules = store.active_rules().await.unwrap();
    assert_eq!(rules[0].total_messages, 2);
    assert!(rules[0].last_activity.is_some());
}

#[tokio::test]
async fn test_record_emission_is_at_most_once() {
    let store = test_store().await;
    assert!(store.record_emission("r1", "abc123").await.unwrap());
    assert!(!store.record_emission("r1", "abc123").await.unwrap());
    // A different rule or message is a fresh pair.
    assert!(store.record_emission("r2", "abc123").await.unwrap());
    assert!(store.record_emission("r1", "def456").await.unwrap());
}

#[tokio::test]
async fn test_dedup_policy_default_and_override() {
    let store = test_store().await;

    let policy = store.dedup_policy("acct-1").await.unwrap();
    assert!(!policy.refresh_mode);
    assert_eq!(policy.duplicate_window_hours, 4);

    store
        .set_dedup_policy(
            "acct-1",
            &DedupPolicy {
                refresh_mode: true,
                duplicate_window_hours: 2,
            },
        )
        .await
        .unwrap();

    let policy = store.dedup_policy("acct-1").await.unwrap();
    assert!(policy.refresh_mode);
    assert_eq!(policy.duplicate_window_hours, 2);
    assert_eq!(policy.effective_window_hours(), 1);
}

#[test]
fn test_body_hash_normalizes_case_and_whitespace() {
    assert_eq!(body_hash("Hello  World"), body_hash("hello world"));
    assert_eq!(body_hash("  hello\nworld "), body_hash("hello world"));
    assert_ne!(body_hash("hello world"), body_hash("hello worlds"));
}

#[test]
fn test_message_key_prefers_provider_id() {
    let with_id = message(Some("abc123"), "5511@c.us", "hi");
    assert_eq!(message_key(&with_id), "abc123");

    let without = message(None, "5511@c.us", "hi");
    let key = message_key(&without);
    assert!(key.starts_with("5511@c.us:"));
    // Stable across redelivery.
    assert_eq!(key, message_key(&message(None, "5511@c.us", "hi")));
}
