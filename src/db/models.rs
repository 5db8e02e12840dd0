use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Post;

/// Outcome of an idempotent post write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The post was not in the store and has been inserted.
    Inserted,
    /// A post with this id already existed; nothing was written.
    AlreadyPresent,
}

/// Read ordering for stored posts. Ties on `created_at` (second resolution)
/// break deterministically on the numeric post id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl ReadOrder {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::NewestFirst => "DESC",
            Self::OldestFirst => "ASC",
        }
    }
}

/// Filters for stored-post reads.
#[derive(Debug, Clone, Default)]
pub struct PostFilters {
    pub exclude_retweets: bool,
    pub conversation_id: Option<String>,
}

/// Scrape bookkeeping for one timeline target.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimelineInfo {
    pub key: String,
    pub url: String,
    pub kind: String,
    pub first_scraped_at: String,
    pub last_scraped_at: String,
    pub newest_post_id: Option<String>,
    pub oldest_post_id: Option<String>,
}

/// A post row as persisted. `raw` is the verbatim backend payload as JSON
/// bytes; `created_at`/`stored_at` are RFC 3339 UTC text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: String,
    pub timeline_key: String,
    pub created_at: String,
    pub author_id: String,
    pub author_handle: String,
    pub conversation_id: String,
    pub in_reply_to_id: Option<String>,
    pub is_retweet: bool,
    pub is_quote: bool,
    pub has_media: bool,
    pub is_self_thread: bool,
    pub text: String,
    pub raw: Vec<u8>,
    pub stored_at: String,
}

impl PostRow {
    /// Convert a stored row back into the canonical [`Post`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stored timestamp or raw payload fails to
    /// parse, which indicates store corruption.
    pub fn into_post(self) -> Result<Post> {
        let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&self.created_at)
            .with_context(|| format!("invalid stored created_at for post {}", self.id))?
            .with_timezone(&Utc);
        let raw = serde_json::from_slice(&self.raw)
            .with_context(|| format!("invalid stored raw payload for post {}", self.id))?;

        Ok(Post {
            id: self.id,
            created_at,
            author_id: self.author_id,
            author_handle: self.author_handle,
            text: self.text,
            conversation_id: self.conversation_id,
            in_reply_to_id: self.in_reply_to_id,
            is_retweet: self.is_retweet,
            is_quote: self.is_quote,
            has_media: self.has_media,
            is_self_thread: self.is_self_thread,
            raw,
        })
    }
}
