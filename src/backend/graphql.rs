//! GraphQL timeline response parsing.
//!
//! Both backends receive the same upstream wire format: the API client calls
//! the GraphQL endpoints directly, the browser client intercepts the page's
//! own calls to them. This module walks the instruction/entry structure and
//! pulls out raw tweet payloads plus the bottom continuation cursor. The
//! cursor value itself stays opaque; it is only carried, never interpreted.

use serde_json::Value;

/// Raw tweets and continuation cursor extracted from one timeline response.
#[derive(Debug, Default)]
pub struct TimelineSlice {
    pub posts: Vec<Value>,
    pub bottom_cursor: Option<String>,
}

/// Extract tweets and the bottom cursor from a timeline response
/// (`UserTweets`, `ListLatestTweetsTimeline`).
#[must_use]
pub fn extract_timeline(data: &Value) -> TimelineSlice {
    let mut slice = TimelineSlice::default();

    for instruction in find_instructions(data) {
        for entry in instruction["entries"].as_array().into_iter().flatten() {
            collect_entry(entry, &mut slice);
        }
        // Pinned/replaced entries arrive outside the entries array
        if let Some(entry) = instruction.get("entry") {
            collect_entry(entry, &mut slice);
        }
    }

    slice
}

/// Extract the full conversation from a `TweetDetail` response.
#[must_use]
pub fn extract_conversation(data: &Value) -> Vec<Value> {
    let mut slice = TimelineSlice::default();

    let instructions = data["data"]["threaded_conversation_with_injections_v2"]["instructions"]
        .as_array()
        .into_iter()
        .flatten();
    for instruction in instructions {
        for entry in instruction["entries"].as_array().into_iter().flatten() {
            collect_entry(entry, &mut slice);
        }
    }

    slice.posts
}

/// Locate the instruction array in any of the known timeline envelopes.
fn find_instructions(data: &Value) -> impl Iterator<Item = &Value> {
    let candidates = [
        // UserTweets
        &data["data"]["user"]["result"]["timeline_v2"]["timeline"]["instructions"],
        &data["data"]["user"]["result"]["timeline"]["timeline"]["instructions"],
        // ListLatestTweetsTimeline
        &data["data"]["list"]["tweets_timeline"]["timeline"]["instructions"],
    ];

    candidates
        .into_iter()
        .find_map(Value::as_array)
        .into_iter()
        .flatten()
}

fn collect_entry(entry: &Value, slice: &mut TimelineSlice) {
    let entry_id = entry["entryId"].as_str().unwrap_or_default();

    if entry_id.starts_with("cursor-") {
        if entry_id.starts_with("cursor-bottom") {
            let content = &entry["content"];
            let value = content["value"]
                .as_str()
                .or_else(|| content["itemContent"]["value"].as_str());
            if let Some(value) = value {
                slice.bottom_cursor = Some(value.to_string());
            }
        }
        return;
    }

    let content = &entry["content"];
    let content_type = content["entryType"]
        .as_str()
        .or_else(|| content["__typename"].as_str())
        .unwrap_or_default();

    match content_type {
        "TimelineTimelineItem" => {
            if let Some(tweet) = tweet_from_item_content(&content["itemContent"]) {
                push_unique(slice, tweet);
            }
        }
        // Conversation groups: a module holds several tweets of one thread
        "TimelineTimelineModule" => {
            for item in content["items"].as_array().into_iter().flatten() {
                let item_content = if item["item"]["itemContent"].is_object() {
                    &item["item"]["itemContent"]
                } else {
                    &item["itemContent"]
                };
                if let Some(tweet) = tweet_from_item_content(item_content) {
                    push_unique(slice, tweet);
                }
            }
        }
        _ => {}
    }
}

/// Unwrap an `itemContent` down to the raw tweet result, skipping
/// tombstones (deleted/withheld tweets) and visibility wrappers.
fn tweet_from_item_content(item_content: &Value) -> Option<Value> {
    let item_type = item_content["itemType"]
        .as_str()
        .or_else(|| item_content["__typename"].as_str())?;
    if item_type != "TimelineTweet" {
        return None;
    }

    let mut result = &item_content["tweet_results"]["result"];
    if result["__typename"].as_str() == Some("TweetWithVisibilityResults") {
        result = &result["tweet"];
    }
    match result["__typename"].as_str() {
        Some("TweetTombstone") => None,
        _ if result.is_object() => Some(result.clone()),
        _ => None,
    }
}

fn push_unique(slice: &mut TimelineSlice, tweet: Value) {
    let id = tweet_id(&tweet);
    if id.is_some() && slice.posts.iter().any(|t| tweet_id(t) == id) {
        return;
    }
    slice.posts.push(tweet);
}

fn tweet_id(tweet: &Value) -> Option<&str> {
    tweet["rest_id"]
        .as_str()
        .or_else(|| tweet["legacy"]["id_str"].as_str())
}
