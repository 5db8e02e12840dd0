//! Self-thread reconstruction.
//!
//! A self-thread is a chain of posts where every link is authored by the
//! conversation root's author. Given a trigger (a self-reply seen during
//! pagination, or a conversation target), the reconstructor fetches the
//! full conversation, stores every post in it, and marks the root author's
//! posts `is_self_thread`. Interleaved replies from other authors are
//! stored but left unmarked.

use anyhow::Result;
use tracing::{debug, warn};

use crate::backend::TimelineBackend;
use crate::db::{self, Database, WriteOutcome};
use crate::error::ScrapeError;
use crate::model::Post;
use crate::normalize;

/// Decide whether a freshly-fetched post replies to its own author.
///
/// The parent's author is established by, in order: a local parent lookup,
/// stored conversation-root ownership, and the payload's own
/// reply-target-author hint. When none of these answer, the post is
/// conservatively treated as not a self-thread; no lookup is issued just to
/// decide detection.
///
/// # Errors
///
/// Returns an error if the store lookups fail.
pub async fn is_self_reply(db: &Database, post: &Post) -> Result<bool> {
    let Some(parent_id) = post.in_reply_to_id.as_deref() else {
        return Ok(false);
    };

    if let Some(parent) = db::get_post(db.pool(), parent_id).await? {
        return Ok(parent.author_id == post.author_id);
    }

    if !post.is_conversation_root() {
        if let Some(root) = db::get_post(db.pool(), &post.conversation_id).await? {
            return Ok(root.author_id == post.author_id);
        }
    }

    if let Some(target_author) = normalize::reply_target_author(&post.raw) {
        return Ok(target_author == post.author_id);
    }

    Ok(false)
}

/// Fetch a full conversation, store every post in it, and mark the chain.
///
/// Returns the posts newly added to the store, oldest first, with
/// `is_self_thread` already set for the root author's posts. Posts that
/// were already stored (for example the triggering timeline post) are not
/// returned but do get their flag upgraded.
///
/// # Errors
///
/// [`ScrapeError::BackendUnavailable`] if the conversation fetch fails and
/// [`ScrapeError::Store`] if persistence fails. Callers decide severity:
/// during timeline runs a fetch failure is reported as a warning, for
/// conversation targets it terminates the run.
pub async fn expand_conversation(
    backend: &dyn TimelineBackend,
    db: &Database,
    timeline_key: &str,
    conversation_id: &str,
) -> Result<Vec<Post>, ScrapeError> {
    let raws = backend
        .fetch_conversation(conversation_id)
        .await
        .map_err(|e| ScrapeError::BackendUnavailable {
            attempts: 1,
            message: format!("{e:#}"),
        })?;

    let mut posts = Vec::with_capacity(raws.len());
    for raw in &raws {
        match normalize::normalize(backend.kind(), raw) {
            Ok(post) => posts.push(post),
            Err(e) => warn!(conversation_id, error = %e, "Skipping malformed conversation record"),
        }
    }
    posts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| numeric_id(&a.id).cmp(&numeric_id(&b.id)))
    });

    let Some(root_author) = root_author(conversation_id, &posts) else {
        debug!(conversation_id, "Conversation fetch returned no usable posts");
        return Ok(Vec::new());
    };

    let mut inserted = Vec::new();
    for mut post in posts {
        post.is_self_thread = post.author_id == root_author;
        let outcome = db::upsert_post(db.pool(), &post, timeline_key)
            .await
            .map_err(ScrapeError::Store)?;
        if outcome == WriteOutcome::Inserted {
            inserted.push(post);
        }
    }

    // Upgrade posts of this conversation stored by earlier pages or runs.
    let marked = db::mark_conversation_self_thread(db.pool(), conversation_id, &root_author)
        .await
        .map_err(ScrapeError::Store)?;

    debug!(
        conversation_id,
        new_posts = inserted.len(),
        marked,
        "Expanded conversation"
    );

    Ok(inserted)
}

/// The thread root's author: the post whose id is the conversation id, or
/// the earliest fetched post when the root itself is gone.
fn root_author(conversation_id: &str, posts: &[Post]) -> Option<String> {
    posts
        .iter()
        .find(|post| post.id == conversation_id)
        .or_else(|| posts.first())
        .map(|post| post.author_id.clone())
}

fn numeric_id(id: &str) -> i64 {
    id.parse().unwrap_or(i64::MAX)
}
