use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical post record, normalized from any backend's raw payload.
///
/// Immutable once stored except for `is_self_thread`, which the thread
/// reconstructor may upgrade from false to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub author_id: String,
    pub author_handle: String,
    pub text: String,
    /// Thread root id; equals `id` for root posts.
    pub conversation_id: String,
    pub in_reply_to_id: Option<String>,
    pub is_retweet: bool,
    pub is_quote: bool,
    pub has_media: bool,
    /// True when this post belongs to a chain authored end-to-end by the
    /// conversation root's author. Set only by the thread reconstructor.
    pub is_self_thread: bool,
    /// Original backend payload, preserved verbatim.
    pub raw: serde_json::Value,
}

impl Post {
    /// Whether this post is the root of its conversation.
    #[must_use]
    pub fn is_conversation_root(&self) -> bool {
        self.id == self.conversation_id
    }
}

/// Which backend produced a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Cookie-authenticated GraphQL API client.
    Api,
    /// Browser-automation client intercepting the same GraphQL traffic.
    Browser,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Browser => "browser",
        }
    }
}

/// Opaque pagination continuation token. The engine never inspects it,
/// only forwards it unchanged to the next fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of raw posts from a backend, newest-first, plus the cursor for
/// the next page. `None` means the source is exhausted.
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub posts: Vec<serde_json::Value>,
    pub next_cursor: Option<Cursor>,
}

/// Items surfaced through a scrape run's output stream.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A newly-seen post, in page order (newest-first within a timeline run).
    Post(Post),
    /// A non-fatal condition the caller may want to act on.
    Warning(RunWarning),
}

/// Structured non-fatal conditions. These never abort the run.
#[derive(Debug, Clone)]
pub enum RunWarning {
    /// A raw record was skipped; the rest of the page was processed.
    MalformedPayload { reason: String },
    /// A conversation fetch failed; the triggering post is stored un-expanded.
    ThreadExpansionFailed {
        conversation_id: String,
        reason: String,
    },
}
