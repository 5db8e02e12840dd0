//! Chromium-automation backend.
//!
//! Drives a real browser with a persistent logged-in profile and intercepts
//! the web app's own GraphQL responses instead of calling the API directly.
//! Pagination works by scrolling the live timeline; the extracted bottom
//! cursor is handed back opaquely and its presence on the next call means
//! "scroll the same session again".

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::graphql;
use super::TimelineBackend;
use crate::config::Config;
use crate::model::{Cursor, FetchPage, SourceKind};
use crate::target::Target;

/// How long to wait for the page to issue a matching GraphQL call.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Scroll pacing, human-like.
const SCROLL_DELAY_MIN: Duration = Duration::from_millis(1500);
const SCROLL_DELAY_MAX: Duration = Duration::from_millis(4000);

static GRAPHQL_ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/i/api/graphql/[^/]+/([A-Za-z0-9_]+)").unwrap());

/// GraphQL operations that carry each timeline kind.
fn endpoints_for(target: &Target) -> &'static [&'static str] {
    match target {
        Target::List { .. } => &["ListLatestTweetsTimeline", "ListTimeline"],
        Target::User { .. } => &["UserTweets", "UserTweetsAndReplies"],
        Target::Conversation { .. } => &["TweetDetail"],
    }
}

fn target_url(target: &Target) -> String {
    match target {
        Target::List { list_id } => format!("https://x.com/i/lists/{list_id}"),
        Target::User { handle } => format!("https://x.com/{handle}"),
        Target::Conversation { conversation_id } => {
            format!("https://x.com/i/status/{conversation_id}")
        }
    }
}

struct PageSession {
    page: Page,
    events: EventStream<EventResponseReceived>,
    target_key: String,
}

struct Inner {
    browser: Option<(Browser, JoinHandle<()>)>,
    session: Option<PageSession>,
}

pub struct BrowserBackend {
    chrome_profile: PathBuf,
    chrome_path: Option<String>,
    headless: bool,
    proxy: Option<String>,
    inner: Mutex<Inner>,
}

impl BrowserBackend {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_profile: config.chrome_profile.clone(),
            chrome_path: config.chrome_path.clone(),
            headless: config.headless,
            proxy: config.proxy.clone(),
            inner: Mutex::new(Inner {
                browser: None,
                session: None,
            }),
        }
    }

    /// Lazily launch the browser; it stays alive for the backend's lifetime.
    async fn ensure_browser<'a>(&self, inner: &'a mut Inner) -> Result<&'a Browser> {
        if inner.browser.is_none() {
            info!(profile = %self.chrome_profile.display(), "Launching browser");
            let launched = launch_browser(
                &self.chrome_profile,
                self.chrome_path.as_deref(),
                self.headless,
                self.proxy.as_deref(),
            )
            .await?;
            inner.browser = Some(launched);
        }
        Ok(&inner.browser.as_ref().expect("browser just launched").0)
    }

    /// Open a fresh page for a target with network interception enabled.
    async fn open_session(&self, inner: &mut Inner, target: &Target) -> Result<()> {
        if let Some(old) = inner.session.take() {
            let _ = old.page.close().await;
        }

        let browser = self.ensure_browser(inner).await?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network events")?;
        let events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to attach response listener")?;

        let url = target_url(target);
        debug!(url = %url, "Navigating");
        page.goto(url).await.context("Navigation failed")?;

        inner.session = Some(PageSession {
            page,
            events,
            target_key: target.key(),
        });
        Ok(())
    }
}

#[async_trait]
impl TimelineBackend for BrowserBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Browser
    }

    async fn fetch_page(&self, target: &Target, cursor: Option<&Cursor>) -> Result<FetchPage> {
        if let Target::Conversation { conversation_id } = target {
            let posts = self.fetch_conversation(conversation_id).await?;
            return Ok(FetchPage {
                posts,
                next_cursor: None,
            });
        }

        let mut inner = self.inner.lock().await;

        // A continuation only makes sense against the live scroll session
        // for the same target; anything else starts fresh.
        let continue_session = cursor.is_some()
            && inner
                .session
                .as_ref()
                .is_some_and(|s| s.target_key == target.key());

        if continue_session {
            let session = inner.session.as_ref().expect("session checked above");
            tokio::time::sleep(super::pacing_delay(SCROLL_DELAY_MIN, SCROLL_DELAY_MAX)).await;
            session
                .page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await
                .context("Scroll failed")?;
        } else {
            self.open_session(&mut inner, target).await?;
        }

        let session = inner.session.as_mut().expect("session exists");
        let data = wait_for_graphql(
            &session.page,
            &mut session.events,
            endpoints_for(target),
            RESPONSE_TIMEOUT,
        )
        .await?;

        let slice = graphql::extract_timeline(&data);
        debug!(
            timeline = %target.key(),
            posts = slice.posts.len(),
            has_cursor = slice.bottom_cursor.is_some(),
            "Intercepted timeline page"
        );

        Ok(FetchPage {
            posts: slice.posts,
            next_cursor: slice.bottom_cursor.map(Cursor::new),
        })
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Vec<Value>> {
        let mut inner = self.inner.lock().await;
        let browser = self.ensure_browser(&mut inner).await?;

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network events")?;
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to attach response listener")?;

        let url = format!("https://x.com/i/status/{conversation_id}");
        debug!(url = %url, "Navigating to conversation");
        page.goto(url).await.context("Navigation failed")?;

        let result = wait_for_graphql(&page, &mut events, &["TweetDetail"], RESPONSE_TIMEOUT).await;
        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        Ok(graphql::extract_conversation(&result?))
    }
}

/// Wait until the page issues a successful GraphQL call for one of the
/// given operations, then read and parse its body.
async fn wait_for_graphql(
    page: &Page,
    events: &mut EventStream<EventResponseReceived>,
    endpoints: &[&str],
    timeout: Duration,
) -> Result<Value> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let event = tokio::time::timeout_at(deadline, events.next())
            .await
            .context("Timed out waiting for a timeline response")?
            .context("Browser event stream closed")?;

        let url = &event.response.url;
        let Some(caps) = GRAPHQL_ENDPOINT.captures(url) else {
            continue;
        };
        let name = caps.get(1).map_or("", |m| m.as_str());
        if !endpoints.contains(&name) {
            continue;
        }
        if event.response.status != 200 {
            debug!(url = %url, status = event.response.status, "Skipping non-200 response");
            continue;
        }

        // The body is not necessarily buffered the instant the headers
        // arrive; give the load a moment to finish.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let body = page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
            .context("Failed to read response body")?;
        if body.result.base64_encoded {
            bail!("unexpected base64-encoded GraphQL body");
        }

        return serde_json::from_str(&body.result.body).context("GraphQL body is not valid JSON");
    }
}

async fn launch_browser(
    profile: &Path,
    chrome_path: Option<&str>,
    headless: bool,
    proxy: Option<&str>,
) -> Result<(Browser, JoinHandle<()>)> {
    tokio::fs::create_dir_all(profile)
        .await
        .with_context(|| format!("Failed to create profile dir: {}", profile.display()))?;

    let mut builder = BrowserConfig::builder()
        .user_data_dir(profile)
        .window_size(1280, 1600)
        .no_sandbox()
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--lang=en-US,en");

    if headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }
    if let Some(proxy) = proxy {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }
    if let Some(path) = chrome_path {
        builder = builder.chrome_executable(path);
    }

    let browser_config = builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser handler error: {e}");
            }
        }
    });

    Ok((browser, handler_task))
}

/// Open the profile in a visible browser for manual login. Returns once the
/// user closes the browser window; the session cookies persist in the
/// profile for subsequent scrape runs.
pub async fn interactive_login(config: &Config) -> Result<()> {
    let (browser, handler_task) = launch_browser(
        &config.chrome_profile,
        config.chrome_path.as_deref(),
        false,
        config.proxy.as_deref(),
    )
    .await?;

    browser
        .new_page("https://x.com/login")
        .await
        .context("Failed to open login page")?;

    info!("Browser opened. Log in to X, then close the browser window.");

    // The handler stream ends when the browser process goes away.
    handler_task.await.context("Browser handler task failed")?;
    drop(browser);

    info!("Session saved to profile");
    Ok(())
}
