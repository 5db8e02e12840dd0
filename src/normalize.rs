//! Payload normalization.
//!
//! Converts backend-specific raw records into the canonical [`Post`] entity.
//! Two upstream shapes exist: the GraphQL tweet result (`rest_id` + `legacy`
//! + `core.user_results`, produced by the API client and by the browser
//! client's response interception) and the flat legacy record (all fields at
//! top level, with an embedded `user` object). The shape is probed per
//! record so downstream components never see backend-specific layouts.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ScrapeError;
use crate::model::{Post, SourceKind};

/// Timestamp format used by legacy tweet payloads,
/// e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const LEGACY_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Normalize one raw payload into a [`Post`].
///
/// Pure function: no I/O, no side effects. The payload is preserved
/// verbatim in [`Post::raw`].
///
/// # Errors
///
/// Returns [`ScrapeError::MalformedPayload`] when the required fields
/// (id, author, `created_at`) are absent or unparsable.
pub fn normalize(kind: SourceKind, raw: &Value) -> Result<Post, ScrapeError> {
    let post = if raw.get("legacy").is_some() {
        normalize_graphql(raw)
    } else {
        normalize_flat(raw)
    };
    post.map_err(|reason| {
        ScrapeError::MalformedPayload(format!("{reason} ({} payload)", kind.as_str()))
    })
}

/// GraphQL tweet result shape.
fn normalize_graphql(raw: &Value) -> Result<Post, String> {
    let legacy = &raw["legacy"];

    let id = str_field(legacy, "id_str")
        .or_else(|| str_field(raw, "rest_id"))
        .ok_or("missing id")?
        .to_string();

    let created_at = parse_created_at(
        str_field(legacy, "created_at").ok_or("missing created_at")?,
    )?;

    let user_result = &raw["core"]["user_results"]["result"];
    let author_id = str_field(user_result, "rest_id")
        .or_else(|| str_field(legacy, "user_id_str"))
        .ok_or("missing author id")?
        .to_string();
    let author_handle = str_field(&user_result["core"], "screen_name")
        .or_else(|| str_field(&user_result["legacy"], "screen_name"))
        .unwrap_or_default()
        .to_string();

    // Long posts carry their full text in note_tweet; legacy.full_text is
    // truncated for those.
    let text = str_field(&raw["note_tweet"]["note_tweet_results"]["result"], "text")
        .or_else(|| str_field(legacy, "full_text"))
        .unwrap_or_default()
        .to_string();

    let conversation_id = str_field(legacy, "conversation_id_str")
        .map_or_else(|| id.clone(), ToString::to_string);
    let in_reply_to_id = str_field(legacy, "in_reply_to_status_id_str").map(ToString::to_string);

    let is_retweet = legacy.get("retweeted_status_result").is_some();
    let is_quote = legacy["is_quote_status"].as_bool().unwrap_or(false);
    let has_media = legacy["extended_entities"]["media"]
        .as_array()
        .is_some_and(|media| !media.is_empty());

    Ok(Post {
        id,
        created_at,
        author_id,
        author_handle,
        text,
        conversation_id,
        in_reply_to_id,
        is_retweet,
        is_quote,
        has_media,
        is_self_thread: false,
        raw: raw.clone(),
    })
}

/// Flat legacy record shape (fields at top level, embedded `user`).
fn normalize_flat(raw: &Value) -> Result<Post, String> {
    let id = str_field(raw, "id_str")
        .map(ToString::to_string)
        .or_else(|| raw["id"].as_u64().map(|n| n.to_string()))
        .ok_or("missing id")?;

    let created_at = parse_created_at(
        str_field(raw, "created_at").ok_or("missing created_at")?,
    )?;

    let user = &raw["user"];
    let author_id = str_field(user, "id_str")
        .or_else(|| str_field(raw, "user_id_str"))
        .ok_or("missing author id")?
        .to_string();
    let author_handle = str_field(user, "screen_name").unwrap_or_default().to_string();

    let text = str_field(raw, "full_text")
        .or_else(|| str_field(raw, "text"))
        .unwrap_or_default()
        .to_string();

    let conversation_id =
        str_field(raw, "conversation_id_str").map_or_else(|| id.clone(), ToString::to_string);
    let in_reply_to_id = str_field(raw, "in_reply_to_status_id_str").map(ToString::to_string);

    let is_retweet =
        raw.get("retweeted_status").is_some() || raw.get("retweeted_status_id_str").is_some();
    let is_quote = raw["is_quote_status"].as_bool().unwrap_or(false);
    let has_media = raw["extended_entities"]["media"]
        .as_array()
        .or_else(|| raw["entities"]["media"].as_array())
        .is_some_and(|media| !media.is_empty());

    Ok(Post {
        id,
        created_at,
        author_id,
        author_handle,
        text,
        conversation_id,
        in_reply_to_id,
        is_retweet,
        is_quote,
        has_media,
        is_self_thread: false,
        raw: raw.clone(),
    })
}

/// Author of the post this payload replies to, when the payload carries it.
/// Used by the thread reconstructor's self-reply heuristic.
#[must_use]
pub fn reply_target_author(raw: &Value) -> Option<&str> {
    str_field(&raw["legacy"], "in_reply_to_user_id_str")
        .or_else(|| str_field(raw, "in_reply_to_user_id_str"))
}

fn parse_created_at(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_str(value, LEGACY_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("unparsable created_at '{value}': {e}"))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
