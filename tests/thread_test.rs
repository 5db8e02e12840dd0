//! Integration tests for self-thread reconstruction.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;

use common::{collect_events, ids, raw_post, raw_reply, setup_db, ScriptedBackend};
use tweetdump::db;
use tweetdump::engine::{scrape, RetryPolicy, ScrapeOptions};
use tweetdump::model::RunWarning;
use tweetdump::target::Target;

fn expand_options() -> ScrapeOptions {
    ScrapeOptions {
        expand_threads: true,
        retry: RetryPolicy {
            attempts: 1,
            backoff: Duration::ZERO,
        },
        ..ScrapeOptions::default()
    }
}

fn user_target() -> Target {
    Target::User {
        handle: "alice".to_string(),
    }
}

/// A five-post self-thread by author 1 (ids 1..=5, each replying to the
/// previous), with an interleaved reply by another author after post 3.
fn thread_fixture() -> Vec<Value> {
    let start = Utc::now() - ChronoDuration::hours(5);
    let at = |i: i64| start + ChronoDuration::minutes(i);

    let mut root = raw_post(1, "1", "alice", at(0));
    root["conversation_id_str"] = serde_json::json!("1");

    vec![
        root,
        raw_reply(2, "1", "alice", at(1), 1, 1, "1"),
        raw_reply(3, "1", "alice", at(2), 1, 2, "1"),
        raw_reply(35, "2", "bob", at(3), 1, 3, "1"),
        raw_reply(4, "1", "alice", at(4), 1, 3, "1"),
        raw_reply(5, "1", "alice", at(5), 1, 4, "1"),
    ]
}

#[tokio::test]
async fn test_expansion_completes_thread_and_marks_membership() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    // The timeline only surfaces post 3 of the thread
    let backend = ScriptedBackend::new()
        .last_page(vec![raw_reply(3, "1", "alice", now - ChronoDuration::hours(5), 1, 2, "1")])
        .conversation("1", thread_fixture());

    let (posts, warnings, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert!(warnings.is_empty());
    // Post 3 from the timeline, then the rest of the conversation oldest
    // first, without re-emitting 3
    assert_eq!(ids(&posts), vec!["3", "1", "2", "35", "4", "5"]);

    // All five of the author's posts are present and marked
    for id in ["1", "2", "3", "4", "5"] {
        let post = db::get_post(db.pool(), id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("post {id} missing"));
        assert!(post.is_self_thread, "post {id} should be marked");
        assert_eq!(post.author_id, "1");
    }

    // The interleaved reply is stored but not marked
    let interleaved = db::get_post(db.pool(), "35").await.unwrap().unwrap();
    assert!(!interleaved.is_self_thread);
    assert_eq!(interleaved.author_id, "2");
}

#[tokio::test]
async fn test_expansion_upgrades_previously_stored_post() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    let backend = ScriptedBackend::new()
        .last_page(vec![raw_reply(3, "1", "alice", now - ChronoDuration::hours(5), 1, 2, "1")])
        .conversation("1", thread_fixture());

    let (_, _, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;
    assert!(error.is_none());

    // Post 3 went into the store unmarked during pagination and was
    // upgraded by the expansion pass
    let post = db::get_post(db.pool(), "3").await.unwrap().unwrap();
    assert!(post.is_self_thread);
}

#[tokio::test]
async fn test_expansion_runs_at_most_once_per_conversation() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    // Two posts of the same thread appear in the same timeline page
    let backend = ScriptedBackend::new()
        .last_page(vec![
            raw_reply(5, "1", "alice", now - ChronoDuration::hours(4), 1, 4, "1"),
            raw_reply(3, "1", "alice", now - ChronoDuration::hours(5), 1, 2, "1"),
        ])
        .conversation("1", thread_fixture());

    let (_, _, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert_eq!(backend.conversation_fetches(), 1);
}

#[tokio::test]
async fn test_reply_to_other_author_does_not_expand() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    // A reply whose target author differs from the poster
    let backend = ScriptedBackend::new().last_page(vec![raw_reply(
        50, "2", "bob", now, 40, 40, "1",
    )]);

    let (posts, _, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert_eq!(posts.len(), 1);
    assert_eq!(backend.conversation_fetches(), 0);
}

#[tokio::test]
async fn test_unknown_parent_defaults_to_no_expansion() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    // A reply with no local parent, no stored root and no reply-target hint
    let mut post = raw_post(50, "2", "bob", now);
    post["conversation_id_str"] = serde_json::json!("40");
    post["in_reply_to_status_id_str"] = serde_json::json!("40");

    let backend = ScriptedBackend::new().last_page(vec![post]);

    let (posts, _, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert_eq!(posts.len(), 1);
    assert_eq!(backend.conversation_fetches(), 0);
}

#[tokio::test]
async fn test_locally_stored_parent_triggers_expansion_without_hint() {
    let (db, _temp_dir) = setup_db().await;
    let start = Utc::now() - ChronoDuration::hours(5);

    // First run stores the thread root
    let mut root = raw_post(1, "1", "alice", start);
    root["conversation_id_str"] = serde_json::json!("1");
    let first = ScriptedBackend::new().last_page(vec![root]);
    let (_, _, error) =
        collect_events(scrape(&first, &db, &user_target(), expand_options())).await;
    assert!(error.is_none());

    // Second run sees a reply to it, carrying no reply-target hint
    let mut reply = raw_post(2, "1", "alice", start + ChronoDuration::minutes(1));
    reply["conversation_id_str"] = serde_json::json!("1");
    reply["in_reply_to_status_id_str"] = serde_json::json!("1");

    let second = ScriptedBackend::new()
        .last_page(vec![reply])
        .conversation("1", thread_fixture());

    let (_, _, error) =
        collect_events(scrape(&second, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert_eq!(second.conversation_fetches(), 1);
}

#[tokio::test]
async fn test_expansion_failure_is_a_warning_not_fatal() {
    let (db, _temp_dir) = setup_db().await;
    let now = Utc::now();

    let backend = ScriptedBackend::new()
        .last_page(vec![raw_reply(3, "1", "alice", now, 1, 2, "1")])
        .failing_conversation("1");

    let (posts, warnings, error) =
        collect_events(scrape(&backend, &db, &user_target(), expand_options())).await;

    assert!(error.is_none());
    assert_eq!(posts.len(), 1);
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        RunWarning::ThreadExpansionFailed { conversation_id, .. } if conversation_id == "1"
    ));

    // The triggering post is stored un-expanded
    let post = db::get_post(db.pool(), "3").await.unwrap().unwrap();
    assert!(!post.is_self_thread);
}

#[tokio::test]
async fn test_conversation_target_emits_oldest_first_and_marks() {
    let (db, _temp_dir) = setup_db().await;

    let backend = ScriptedBackend::new().conversation("1", thread_fixture());
    let target = Target::Conversation {
        conversation_id: "1".to_string(),
    };

    let (posts, warnings, error) =
        collect_events(scrape(&backend, &db, &target, expand_options())).await;

    assert!(error.is_none());
    assert!(warnings.is_empty());
    assert_eq!(ids(&posts), vec!["1", "2", "3", "35", "4", "5"]);

    for post in &posts {
        if post.author_id == "1" {
            assert!(post.is_self_thread, "post {} should be marked", post.id);
        } else {
            assert!(!post.is_self_thread, "post {} should not be marked", post.id);
        }
    }

    // The run is recorded for offline reads
    assert!(db::get_timeline_info(db.pool(), "conversation:1")
        .await
        .unwrap()
        .is_some());
}
