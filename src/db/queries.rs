use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use super::models::{PostFilters, PostRow, ReadOrder, TimelineInfo, WriteOutcome};
use crate::model::Post;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ========== Posts ==========

/// Check whether a post id is already stored.
pub async fn has_post(pool: &SqlitePool, id: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to check post existence")?;
    Ok(row.is_some())
}

/// Idempotently store a post under a timeline key.
///
/// A single atomic statement: concurrent writers racing on the same id are
/// serialized by SQLite and exactly one observes [`WriteOutcome::Inserted`];
/// the rest observe [`WriteOutcome::AlreadyPresent`]. An existing row is
/// never overwritten.
pub async fn upsert_post(
    pool: &SqlitePool,
    post: &Post,
    timeline_key: &str,
) -> Result<WriteOutcome> {
    let raw_blob = serde_json::to_vec(&post.raw).context("Failed to serialize raw payload")?;

    let result = sqlx::query(
        r"
        INSERT INTO posts
        (id, timeline_key, created_at, author_id, author_handle, conversation_id,
         in_reply_to_id, is_retweet, is_quote, has_media, is_self_thread, text, raw, stored_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        ",
    )
    .bind(&post.id)
    .bind(timeline_key)
    .bind(post.created_at.to_rfc3339_opts(SecondsFormat::Secs, true))
    .bind(&post.author_id)
    .bind(&post.author_handle)
    .bind(&post.conversation_id)
    .bind(&post.in_reply_to_id)
    .bind(post.is_retweet)
    .bind(post.is_quote)
    .bind(post.has_media)
    .bind(post.is_self_thread)
    .bind(&post.text)
    .bind(raw_blob)
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    if result.rows_affected() > 0 {
        Ok(WriteOutcome::Inserted)
    } else {
        Ok(WriteOutcome::AlreadyPresent)
    }
}

/// Fetch a single stored post by id.
pub async fn get_post(pool: &SqlitePool, id: &str) -> Result<Option<Post>> {
    let row: Option<PostRow> = sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")?;

    row.map(PostRow::into_post).transpose()
}

/// All post ids already stored for a timeline, without loading bodies.
/// Supports the engine's dedup-saturation stop condition.
pub async fn existing_ids_for(pool: &SqlitePool, timeline_key: &str) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT id FROM posts WHERE timeline_key = ?")
        .bind(timeline_key)
        .fetch_all(pool)
        .await
        .context("Failed to fetch existing post ids")?;

    Ok(rows.iter().map(|row| row.get::<String, _>(0)).collect())
}

/// Read stored posts for a timeline with ordering, an optional result cap
/// and filters. Ordering is by `created_at` with the numeric post id as
/// tie-break, so newest-first and oldest-first are exact reverses.
pub async fn read_posts(
    pool: &SqlitePool,
    timeline_key: &str,
    order: ReadOrder,
    limit: Option<u32>,
    filters: &PostFilters,
) -> Result<Vec<Post>> {
    let mut sql = String::from("SELECT * FROM posts WHERE timeline_key = ?");
    if filters.exclude_retweets {
        sql.push_str(" AND is_retweet = 0");
    }
    if filters.conversation_id.is_some() {
        sql.push_str(" AND conversation_id = ?");
    }
    let dir = order.as_sql();
    sql.push_str(&format!(
        " ORDER BY created_at {dir}, CAST(id AS INTEGER) {dir}"
    ));
    if limit.is_some() {
        sql.push_str(" LIMIT ?");
    }

    let mut query = sqlx::query_as::<_, PostRow>(&sql).bind(timeline_key);
    if let Some(conversation_id) = &filters.conversation_id {
        query = query.bind(conversation_id);
    }
    if let Some(limit) = limit {
        query = query.bind(i64::from(limit));
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to read posts")?;

    rows.into_iter().map(PostRow::into_post).collect()
}

/// All stored posts of one conversation, oldest first.
pub async fn get_conversation(pool: &SqlitePool, conversation_id: &str) -> Result<Vec<Post>> {
    let rows: Vec<PostRow> = sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE conversation_id = ?
        ORDER BY created_at ASC, CAST(id AS INTEGER) ASC
        ",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .context("Failed to read conversation")?;

    rows.into_iter().map(PostRow::into_post).collect()
}

/// Upgrade `is_self_thread` for every post of a conversation authored by
/// the conversation root's author. Returns the number of rows updated.
/// The flag only ever goes from false to true; no other field mutates.
pub async fn mark_conversation_self_thread(
    pool: &SqlitePool,
    conversation_id: &str,
    root_author_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE posts SET is_self_thread = 1
        WHERE conversation_id = ? AND author_id = ? AND is_self_thread = 0
        ",
    )
    .bind(conversation_id)
    .bind(root_author_id)
    .execute(pool)
    .await
    .context("Failed to mark self-thread posts")?;

    Ok(result.rows_affected())
}

/// Number of posts stored for a timeline.
pub async fn count_posts(pool: &SqlitePool, timeline_key: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM posts WHERE timeline_key = ?")
        .bind(timeline_key)
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(row.get(0))
}

// ========== Timelines ==========

/// Get scrape bookkeeping for a timeline key.
pub async fn get_timeline_info(pool: &SqlitePool, key: &str) -> Result<Option<TimelineInfo>> {
    sqlx::query_as("SELECT * FROM timelines WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch timeline info")
}

/// Record a completed scrape pass over a timeline.
///
/// `newest_post_id` / `oldest_post_id` only move outward: the stored newest
/// id never decreases and the stored oldest id never increases across runs.
pub async fn update_timeline_info(
    pool: &SqlitePool,
    key: &str,
    url: &str,
    kind: &str,
    newest_post_id: Option<&str>,
    oldest_post_id: Option<&str>,
) -> Result<()> {
    let now = now_rfc3339();
    let existing = get_timeline_info(pool, key).await?;

    match existing {
        None => {
            sqlx::query(
                r"
                INSERT INTO timelines
                (key, url, kind, first_scraped_at, last_scraped_at, newest_post_id, oldest_post_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(key)
            .bind(url)
            .bind(kind)
            .bind(&now)
            .bind(&now)
            .bind(newest_post_id)
            .bind(oldest_post_id)
            .execute(pool)
            .await
            .context("Failed to insert timeline info")?;
        }
        Some(info) => {
            let newest = pick_id(info.newest_post_id.as_deref(), newest_post_id, true);
            let oldest = pick_id(info.oldest_post_id.as_deref(), oldest_post_id, false);

            sqlx::query(
                r"
                UPDATE timelines
                SET last_scraped_at = ?, newest_post_id = ?, oldest_post_id = ?
                WHERE key = ?
                ",
            )
            .bind(&now)
            .bind(newest)
            .bind(oldest)
            .bind(key)
            .execute(pool)
            .await
            .context("Failed to update timeline info")?;
        }
    }

    Ok(())
}

/// Pick the more extreme of two post ids by numeric value.
fn pick_id<'a>(existing: Option<&'a str>, candidate: Option<&'a str>, want_max: bool) -> Option<&'a str> {
    match (existing, candidate) {
        (Some(a), Some(b)) => {
            let (na, nb) = (a.parse::<i64>().ok(), b.parse::<i64>().ok());
            match (na, nb) {
                (Some(na), Some(nb)) => {
                    if (nb > na) == want_max {
                        Some(b)
                    } else {
                        Some(a)
                    }
                }
                // Unparsable ids keep the existing value
                _ => Some(a),
            }
        }
        (Some(a), None) => Some(a),
        (None, candidate) => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_id_monotone() {
        assert_eq!(pick_id(Some("100"), Some("99"), true), Some("100"));
        assert_eq!(pick_id(Some("100"), Some("101"), true), Some("101"));
        assert_eq!(pick_id(Some("100"), Some("99"), false), Some("99"));
        assert_eq!(pick_id(Some("100"), Some("101"), false), Some("100"));
        assert_eq!(pick_id(None, Some("42"), true), Some("42"));
        assert_eq!(pick_id(Some("42"), None, false), Some("42"));
        // Numeric, not lexicographic: "99" < "100"
        assert_eq!(pick_id(Some("99"), Some("100"), true), Some("100"));
    }
}
