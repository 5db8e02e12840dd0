//! Cookie-authenticated GraphQL API backend.
//!
//! Talks to the same GraphQL endpoints the web client uses, authenticated
//! with the browser session cookies (`auth_token` + `ct0`) supplied via
//! configuration.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE, USER_AGENT};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::graphql;
use super::TimelineBackend;
use crate::config::Config;
use crate::model::{Cursor, FetchPage, SourceKind};
use crate::target::Target;

/// Public bearer token of the X web client; session cookies carry the
/// actual authentication.
const WEB_BEARER: &str = "Bearer AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// A GraphQL operation: persisted query id + operation name.
struct GqlOp {
    query_id: &'static str,
    name: &'static str,
}

const USER_BY_SCREEN_NAME: GqlOp = GqlOp {
    query_id: "1VOOyvKkiI3FMmkeDNxM9A",
    name: "UserByScreenName",
};
const USER_TWEETS: GqlOp = GqlOp {
    query_id: "E3opETHurmVJflFsUBVuUQ",
    name: "UserTweets",
};
const LIST_LATEST_TWEETS_TIMELINE: GqlOp = GqlOp {
    query_id: "2TemLyqrMpTeAmysdbnVqw",
    name: "ListLatestTweetsTimeline",
};
const TWEET_DETAIL: GqlOp = GqlOp {
    query_id: "xOhkmRac04YFZmOzU9PJHg",
    name: "TweetDetail",
};

/// Feature flags the GraphQL endpoints insist on receiving.
const FEATURES: &str = r#"{"responsive_web_graphql_exclude_directive_enabled":true,"responsive_web_graphql_timeline_navigation_enabled":true,"responsive_web_graphql_skip_user_profile_image_extensions_enabled":false,"longform_notetweets_consumption_enabled":true,"longform_notetweets_rich_text_read_enabled":true,"longform_notetweets_inline_media_enabled":true,"tweet_awards_web_tipping_enabled":false,"creator_subscriptions_tweet_preview_api_enabled":true,"freedom_of_speech_not_reach_fetch_enabled":true,"standardized_nudges_misinfo":true,"tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled":true,"view_counts_everywhere_api_enabled":true,"verified_phone_label_enabled":false}"#;

/// Pacing between consecutive continuation fetches.
const PAGE_DELAY_MIN: Duration = Duration::from_millis(1500);
const PAGE_DELAY_MAX: Duration = Duration::from_millis(4000);

pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    user_id_cache: Mutex<HashMap<String, String>>,
}

impl ApiBackend {
    /// Build the backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookies are missing or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let auth_token = config
            .auth_token
            .as_deref()
            .context("API backend requires TWEETDUMP_AUTH_TOKEN")?;
        let csrf_token = config
            .csrf_token
            .as_deref()
            .context("API backend requires TWEETDUMP_CSRF_TOKEN")?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(WEB_BEARER));
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("auth_token={auth_token}; ct0={csrf_token}"))
                .context("Invalid cookie values")?,
        );
        headers.insert(
            "x-csrf-token",
            HeaderValue::from_str(csrf_token).context("Invalid CSRF token")?,
        );
        headers.insert("x-twitter-auth-type", HeaderValue::from_static("OAuth2Session"));
        headers.insert("x-twitter-active-user", HeaderValue::from_static("yes"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
        }

        Ok(Self {
            client: builder.build().context("Failed to build HTTP client")?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            user_id_cache: Mutex::new(HashMap::new()),
        })
    }

    async fn gql_get(&self, op: &GqlOp, variables: &Value) -> Result<Value> {
        let url = format!("{}/{}/{}", self.base_url, op.query_id, op.name);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("variables", variables.to_string()),
                ("features", FEATURES.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("{} request failed", op.name))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} request failed with status {status}", op.name);
        }

        response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", op.name))
    }

    /// Resolve a handle to its numeric user id, cached per backend instance.
    async fn resolve_user_id(&self, handle: &str) -> Result<String> {
        let key = handle.to_lowercase();
        if let Some(id) = self.user_id_cache.lock().await.get(&key) {
            return Ok(id.clone());
        }

        let data = self
            .gql_get(
                &USER_BY_SCREEN_NAME,
                &json!({ "screen_name": handle, "withSafetyModeUserFields": true }),
            )
            .await?;

        let Some(user_id) = data["data"]["user"]["result"]["rest_id"].as_str() else {
            bail!("user not found: {handle}");
        };
        let user_id = user_id.to_string();

        self.user_id_cache
            .lock()
            .await
            .insert(key, user_id.clone());
        Ok(user_id)
    }
}

#[async_trait]
impl TimelineBackend for ApiBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch_page(&self, target: &Target, cursor: Option<&Cursor>) -> Result<FetchPage> {
        // Pace continuation fetches; the first page goes out immediately.
        if cursor.is_some() {
            tokio::time::sleep(super::pacing_delay(PAGE_DELAY_MIN, PAGE_DELAY_MAX)).await;
        }

        let (op, mut variables) = match target {
            Target::User { handle } => {
                let user_id = self.resolve_user_id(handle).await?;
                (
                    &USER_TWEETS,
                    json!({
                        "userId": user_id,
                        "count": self.page_size,
                        "includePromotedContent": false,
                    }),
                )
            }
            Target::List { list_id } => (
                &LIST_LATEST_TWEETS_TIMELINE,
                json!({ "listId": list_id, "count": self.page_size }),
            ),
            Target::Conversation { conversation_id } => {
                // A conversation is a single fetch, not a paginated timeline.
                let posts = self.fetch_conversation(conversation_id).await?;
                return Ok(FetchPage {
                    posts,
                    next_cursor: None,
                });
            }
        };

        if let Some(cursor) = cursor {
            variables["cursor"] = Value::String(cursor.as_str().to_string());
        }

        let data = self.gql_get(op, &variables).await?;
        let slice = graphql::extract_timeline(&data);
        debug!(
            timeline = %target.key(),
            posts = slice.posts.len(),
            has_cursor = slice.bottom_cursor.is_some(),
            "Fetched timeline page"
        );

        Ok(FetchPage {
            posts: slice.posts,
            next_cursor: slice.bottom_cursor.map(Cursor::new),
        })
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Vec<Value>> {
        let data = self
            .gql_get(
                &TWEET_DETAIL,
                &json!({
                    "focalTweetId": conversation_id,
                    "with_rux_injections": false,
                    "includePromotedContent": false,
                    "withCommunity": false,
                }),
            )
            .await?;

        let posts = graphql::extract_conversation(&data);
        debug!(conversation_id, posts = posts.len(), "Fetched conversation");
        Ok(posts)
    }
}
