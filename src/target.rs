use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use url::Url;

/// A scrape or view target: a list timeline, a user timeline, or a single
/// conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    List { list_id: String },
    User { handle: String },
    Conversation { conversation_id: String },
}

impl Target {
    /// Stable storage key for this target, e.g. `list:1409181262510690310`,
    /// `user:jack` or `conversation:20`.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::List { list_id } => format!("list:{list_id}"),
            Self::User { handle } => format!("user:{}", handle.to_lowercase()),
            Self::Conversation { conversation_id } => format!("conversation:{conversation_id}"),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::User { .. } => "user",
            Self::Conversation { .. } => "conversation",
        }
    }

    /// Canonical URL for this target, used for scrape bookkeeping.
    #[must_use]
    pub fn canonical_url(&self) -> String {
        match self {
            Self::List { list_id } => format!("https://x.com/i/lists/{list_id}"),
            Self::User { handle } => format!("https://x.com/{handle}"),
            Self::Conversation { conversation_id } => {
                format!("https://x.com/i/status/{conversation_id}")
            }
        }
    }
}

static LIST_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/i/lists/(?P<list_id>\d+)/?$").unwrap());

static STATUS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:i|@?[A-Za-z0-9_]{1,15})/status(?:es)?/(?P<status_id>\d+)/?$").unwrap()
});

static USER_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/@?(?P<handle>[A-Za-z0-9_]{1,15})(?:/(?:with_replies)?)?$").unwrap()
});

/// Paths that look like user handles but are app routes.
const RESERVED_PATHS: &[&str] = &[
    "i", "home", "explore", "search", "notifications", "messages", "settings", "compose", "intent",
];

/// Parse an X/Twitter URL into a [`Target`].
///
/// Supported forms:
/// - `https://x.com/i/lists/{list_id}`
/// - `https://x.com/{handle}` (optionally `@{handle}` or `/with_replies`)
/// - `https://x.com/{handle}/status/{id}` and `https://x.com/i/status/{id}`
///
/// `twitter.com` and `www.`/`mobile.` hosts are accepted as aliases.
///
/// # Errors
///
/// Returns an error for non-X hosts and unrecognized paths.
pub fn parse_timeline_url(raw: &str) -> Result<Target> {
    let parsed = Url::parse(raw)?;

    let host = parsed.host_str().unwrap_or_default();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("mobile."))
        .unwrap_or(host);
    if host != "x.com" && host != "twitter.com" {
        bail!("unsupported host: {host}");
    }

    let path = parsed.path();

    if let Some(caps) = LIST_PATH.captures(path) {
        return Ok(Target::List {
            list_id: caps["list_id"].to_string(),
        });
    }

    // Status URLs before user profiles: `/jack/status/20` also matches the
    // user pattern's prefix.
    if let Some(caps) = STATUS_PATH.captures(path) {
        return Ok(Target::Conversation {
            conversation_id: caps["status_id"].to_string(),
        });
    }

    if let Some(caps) = USER_PATH.captures(path) {
        let handle = caps["handle"].to_string();
        if !RESERVED_PATHS.contains(&handle.to_lowercase().as_str()) {
            return Ok(Target::User { handle });
        }
    }

    bail!("unrecognized X timeline URL: {raw}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_url() {
        let target = parse_timeline_url("https://x.com/i/lists/1409181262510690310").unwrap();
        assert_eq!(
            target,
            Target::List {
                list_id: "1409181262510690310".to_string()
            }
        );
        assert_eq!(target.key(), "list:1409181262510690310");
    }

    #[test]
    fn test_parse_user_url() {
        for url in [
            "https://x.com/jack",
            "https://x.com/@jack",
            "https://twitter.com/jack",
            "https://www.x.com/jack/",
            "https://x.com/jack/with_replies",
        ] {
            let target = parse_timeline_url(url).unwrap();
            assert_eq!(
                target,
                Target::User {
                    handle: "jack".to_string()
                },
                "failed for {url}"
            );
        }
    }

    #[test]
    fn test_user_key_is_lowercased() {
        let target = parse_timeline_url("https://x.com/Jack").unwrap();
        assert_eq!(target.key(), "user:jack");
    }

    #[test]
    fn test_parse_status_url() {
        for url in [
            "https://x.com/jack/status/20",
            "https://x.com/i/status/20",
            "https://twitter.com/jack/statuses/20",
        ] {
            let target = parse_timeline_url(url).unwrap();
            assert_eq!(
                target,
                Target::Conversation {
                    conversation_id: "20".to_string()
                },
                "failed for {url}"
            );
        }
    }

    #[test]
    fn test_reserved_paths_are_not_users() {
        assert!(parse_timeline_url("https://x.com/home").is_err());
        assert!(parse_timeline_url("https://x.com/settings").is_err());
        assert!(parse_timeline_url("https://x.com/explore").is_err());
    }

    #[test]
    fn test_rejects_other_hosts() {
        assert!(parse_timeline_url("https://example.com/jack").is_err());
        assert!(parse_timeline_url("https://x.com.evil.com/jack").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_timeline_url("not a url").is_err());
        assert!(parse_timeline_url("https://x.com/i/lists/notanumber").is_err());
    }
}
