//! Integration tests for the offline view layer.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{ids, setup_db};
use tweetdump::db::{self, PostFilters, ReadOrder};
use tweetdump::error::ScrapeError;
use tweetdump::model::Post;
use tweetdump::target::Target;
use tweetdump::view::{read, ViewOptions};

fn post(id: &str, minutes_ago: i64) -> Post {
    Post {
        id: id.to_string(),
        created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        author_id: "12".to_string(),
        author_handle: "jack".to_string(),
        text: format!("post {id}"),
        conversation_id: id.to_string(),
        in_reply_to_id: None,
        is_retweet: false,
        is_quote: false,
        has_media: false,
        is_self_thread: false,
        raw: json!({ "id_str": id }),
    }
}

fn user_target() -> Target {
    Target::User {
        handle: "jack".to_string(),
    }
}

async fn record_scrape(db: &tweetdump::db::Database) {
    db::update_timeline_info(
        db.pool(),
        "user:jack",
        "https://x.com/jack",
        "user",
        None,
        None,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_never_scraped_target_is_not_found() {
    let (db, _temp_dir) = setup_db().await;

    let result = read(&db, &user_target(), &ViewOptions::default()).await;
    assert!(matches!(result, Err(ScrapeError::NotFound(key)) if key == "user:jack"));
}

#[tokio::test]
async fn test_scraped_but_empty_target_returns_empty() {
    let (db, _temp_dir) = setup_db().await;
    record_scrape(&db).await;

    let posts = read(&db, &user_target(), &ViewOptions::default())
        .await
        .unwrap();
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_view_reads_without_network() {
    let (db, _temp_dir) = setup_db().await;
    record_scrape(&db).await;

    for (id, age) in [("101", 3), ("102", 2), ("103", 1)] {
        db::upsert_post(db.pool(), &post(id, age), "user:jack")
            .await
            .unwrap();
    }

    let newest_first = read(&db, &user_target(), &ViewOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&newest_first), vec!["103", "102", "101"]);

    let oldest_first = read(
        &db,
        &user_target(),
        &ViewOptions {
            order: ReadOrder::OldestFirst,
            ..ViewOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(ids(&oldest_first), vec!["101", "102", "103"]);

    let limited = read(
        &db,
        &user_target(),
        &ViewOptions {
            limit: Some(1),
            ..ViewOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(ids(&limited), vec!["103"]);
}

#[tokio::test]
async fn test_view_filters() {
    let (db, _temp_dir) = setup_db().await;
    record_scrape(&db).await;

    let mut retweet = post("201", 1);
    retweet.is_retweet = true;
    let mut in_thread = post("202", 2);
    in_thread.conversation_id = "200".to_string();
    let plain = post("203", 3);

    for p in [&retweet, &in_thread, &plain] {
        db::upsert_post(db.pool(), p, "user:jack").await.unwrap();
    }

    let no_retweets = read(
        &db,
        &user_target(),
        &ViewOptions {
            filters: PostFilters {
                exclude_retweets: true,
                conversation_id: None,
            },
            ..ViewOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(ids(&no_retweets), vec!["202", "203"]);

    let thread_only = read(
        &db,
        &user_target(),
        &ViewOptions {
            filters: PostFilters {
                exclude_retweets: false,
                conversation_id: Some("200".to_string()),
            },
            ..ViewOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(ids(&thread_only), vec!["202"]);
}
