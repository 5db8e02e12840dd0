//! Shared test helpers: a temp-file store and a scripted in-memory backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;

use tweetdump::backend::TimelineBackend;
use tweetdump::db::Database;
use tweetdump::error::ScrapeError;
use tweetdump::model::{Cursor, FetchPage, Post, RunEvent, RunWarning, SourceKind};
use tweetdump::target::Target;

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// A raw post in the flat payload shape.
pub fn raw_post(id: u64, author_id: &str, handle: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "id_str": id.to_string(),
        "created_at": created_at.to_rfc3339(),
        "full_text": format!("post {id}"),
        "user": { "id_str": author_id, "screen_name": handle },
        "is_quote_status": false,
    })
}

/// A raw reply: sets conversation, parent id and the reply-target-author
/// hint carried by real payloads.
pub fn raw_reply(
    id: u64,
    author_id: &str,
    handle: &str,
    created_at: DateTime<Utc>,
    conversation_id: u64,
    in_reply_to: u64,
    in_reply_to_author: &str,
) -> Value {
    let mut post = raw_post(id, author_id, handle, created_at);
    post["conversation_id_str"] = json!(conversation_id.to_string());
    post["in_reply_to_status_id_str"] = json!(in_reply_to.to_string());
    post["in_reply_to_user_id_str"] = json!(in_reply_to_author);
    post
}

enum ScriptedPage {
    Page { posts: Vec<Value>, has_next: bool },
    Fail,
}

/// Backend fed from a fixed script of pages and conversations. Incoming
/// cursors are accepted opaquely; pages are served in script order.
pub struct ScriptedBackend {
    pages: Vec<ScriptedPage>,
    conversations: HashMap<String, Vec<Value>>,
    failing_conversations: Vec<String>,
    page_fetches: AtomicUsize,
    conversation_fetches: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            conversations: HashMap::new(),
            failing_conversations: Vec::new(),
            page_fetches: AtomicUsize::new(0),
            conversation_fetches: AtomicUsize::new(0),
        }
    }

    /// Add a page followed by more pages.
    pub fn page(mut self, posts: Vec<Value>) -> Self {
        self.pages.push(ScriptedPage::Page {
            posts,
            has_next: true,
        });
        self
    }

    /// Add a final page: no continuation cursor.
    pub fn last_page(mut self, posts: Vec<Value>) -> Self {
        self.pages.push(ScriptedPage::Page {
            posts,
            has_next: false,
        });
        self
    }

    /// Add a page fetch that fails.
    pub fn failing_page(mut self) -> Self {
        self.pages.push(ScriptedPage::Fail);
        self
    }

    pub fn conversation(mut self, conversation_id: &str, posts: Vec<Value>) -> Self {
        self.conversations.insert(conversation_id.to_string(), posts);
        self
    }

    pub fn failing_conversation(mut self, conversation_id: &str) -> Self {
        self.failing_conversations.push(conversation_id.to_string());
        self
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn conversation_fetches(&self) -> usize {
        self.conversation_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimelineBackend for ScriptedBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch_page(&self, _target: &Target, _cursor: Option<&Cursor>) -> Result<FetchPage> {
        let index = self.page_fetches.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(index) {
            None => Ok(FetchPage {
                posts: Vec::new(),
                next_cursor: None,
            }),
            Some(ScriptedPage::Fail) => bail!("scripted page failure"),
            Some(ScriptedPage::Page { posts, has_next }) => Ok(FetchPage {
                posts: posts.clone(),
                next_cursor: has_next.then(|| Cursor::new(format!("scroll:{}", index + 1))),
            }),
        }
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Vec<Value>> {
        self.conversation_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_conversations.iter().any(|c| c == conversation_id) {
            bail!("scripted conversation failure");
        }
        Ok(self
            .conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Drain a run's stream into posts, warnings and the terminal error if any.
pub async fn collect_events(
    stream: impl Stream<Item = Result<RunEvent, ScrapeError>>,
) -> (Vec<Post>, Vec<RunWarning>, Option<ScrapeError>) {
    futures_util::pin_mut!(stream);

    let mut posts = Vec::new();
    let mut warnings = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(RunEvent::Post(post)) => posts.push(post),
            Ok(RunEvent::Warning(warning)) => warnings.push(warning),
            Err(e) => return (posts, warnings, Some(e)),
        }
    }
    (posts, warnings, None)
}

/// Ids of a slice of posts, for order assertions.
pub fn ids(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|p| p.id.as_str()).collect()
}
