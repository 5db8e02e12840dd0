//! Pagination and termination engine.
//!
//! Drives repeated fetch-backend calls for a target, normalizes and
//! idempotently stores each raw post, and yields the newly-seen posts as a
//! lazy stream in page order (newest-first). Stop conditions are evaluated
//! after each page; dropping the stream cancels the run between suspension
//! points with everything already stored left committed.

use std::collections::HashSet;
use std::time::Duration;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::backend::TimelineBackend;
use crate::db::{self, Database, WriteOutcome};
use crate::error::ScrapeError;
use crate::model::{Cursor, FetchPage, RunEvent, RunWarning};
use crate::normalize;
use crate::target::Target;
use crate::thread;

/// Retry policy for failed page fetches, supplied by the caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first.
    pub attempts: u32,
    /// Base delay between attempts; grows linearly and is jittered.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt.max(1));
        // +/- 25% jitter
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(jitter)
    }
}

/// Pacing range for thread expansions, human-like.
#[derive(Debug, Clone, Copy)]
pub struct Pace {
    pub min: Duration,
    pub max: Duration,
}

impl Pace {
    fn jittered(self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Options for one scrape run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Stop after emitting this many newly-seen posts.
    pub max_count: Option<usize>,
    /// Stop once a page reaches posts older than `now - max_age`; posts past
    /// the cutoff are neither stored nor emitted.
    pub max_age: Option<Duration>,
    /// Stop after consuming this many pages.
    pub max_pages: Option<usize>,
    /// Expand self-threads detected during the run.
    pub expand_threads: bool,
    /// Retry policy for failed page fetches.
    pub retry: RetryPolicy,
    /// Delay between thread expansions. `None` expands back to back.
    pub expansion_pace: Option<Pace>,
}

impl ScrapeOptions {
    fn unbounded(&self) -> bool {
        self.max_count.is_none() && self.max_age.is_none() && self.max_pages.is_none()
    }
}

/// Scrape a target into the store, yielding [`RunEvent`]s lazily.
///
/// Newly-seen posts are yielded in page order; posts the store already had
/// are counted for the saturation stop conditions but not re-emitted. The
/// stream ends after natural exhaustion or a stop condition; a terminal
/// `Err` means the run is incomplete, with everything yielded so far
/// committed.
pub fn scrape<'a>(
    backend: &'a dyn TimelineBackend,
    db: &'a Database,
    target: &'a Target,
    options: ScrapeOptions,
) -> impl Stream<Item = Result<RunEvent, ScrapeError>> + 'a {
    try_stream! {
        let timeline_key = target.key();

        if let Target::Conversation { conversation_id } = target {
            // A conversation target is a single reconstructed fetch, not a
            // paginated run.
            let posts = thread::expand_conversation(backend, db, &timeline_key, conversation_id)
                .await?;
            let count = posts.len();
            for post in posts {
                yield RunEvent::Post(post);
            }
            finish_run(db, target, &timeline_key, None, None).await?;
            info!(timeline = %timeline_key, new_posts = count, "Conversation run complete");
        } else {
            for await event in scrape_timeline(backend, db, target, &timeline_key, &options) {
                yield event?;
            }
        }
    }
}

/// The paginated portion of a run, for list and user targets.
fn scrape_timeline<'a>(
    backend: &'a dyn TimelineBackend,
    db: &'a Database,
    target: &'a Target,
    timeline_key: &'a str,
    options: &'a ScrapeOptions,
) -> impl Stream<Item = Result<RunEvent, ScrapeError>> + 'a {
    try_stream! {
        let cutoff = max_age_cutoff(options);
        let mut cursor: Option<Cursor> = None;
        let mut pages_consumed = 0usize;
        let mut emitted = 0usize;
        let mut consecutive_duplicate_pages = 0u32;
        let mut newest_id: Option<String> = None;
        let mut oldest_id: Option<String> = None;
        let mut seen_this_run: HashSet<String> = HashSet::new();
        let mut expanded: HashSet<String> = HashSet::new();
        let mut pending_expansions: Vec<String> = Vec::new();

        'pagination: loop {
            let page = fetch_page_with_retry(backend, target, cursor.as_ref(), &options.retry)
                .await?;
            pages_consumed += 1;

            let mut new_in_page = 0usize;
            let mut age_exceeded = false;

            for raw in &page.posts {
                let post = match normalize::normalize(backend.kind(), raw) {
                    Ok(post) => post,
                    Err(ScrapeError::MalformedPayload(reason)) => {
                        warn!(timeline = %timeline_key, %reason, "Skipping malformed record");
                        yield RunEvent::Warning(RunWarning::MalformedPayload { reason });
                        continue;
                    }
                    Err(other) => Err(other)?,
                };

                if let Some(cutoff) = cutoff {
                    if post.created_at < cutoff {
                        age_exceeded = true;
                        continue;
                    }
                }

                let outcome = db::upsert_post(db.pool(), &post, timeline_key)
                    .await
                    .map_err(ScrapeError::Store)?;
                if outcome == WriteOutcome::AlreadyPresent {
                    debug!(id = %post.id, "Already stored, skipping");
                    continue;
                }

                if newest_id.is_none() {
                    newest_id = Some(post.id.clone());
                }
                oldest_id = Some(post.id.clone());
                seen_this_run.insert(post.id.clone());
                new_in_page += 1;
                emitted += 1;

                if options.expand_threads
                    && !expanded.contains(&post.conversation_id)
                    && thread::is_self_reply(db, &post)
                        .await
                        .map_err(ScrapeError::Store)?
                {
                    expanded.insert(post.conversation_id.clone());
                    pending_expansions.push(post.conversation_id.clone());
                }

                yield RunEvent::Post(post);

                if options.max_count.is_some_and(|max| emitted >= max) {
                    debug!(emitted, "Reached max count");
                    break 'pagination;
                }
            }

            if age_exceeded {
                debug!(pages_consumed, "Reached age cutoff");
                break;
            }
            if options.max_pages.is_some_and(|max| pages_consumed >= max) {
                debug!(pages_consumed, "Reached page limit");
                break;
            }
            let Some(next_cursor) = page.next_cursor else {
                debug!(pages_consumed, "Source exhausted");
                break;
            };
            if options.unbounded() {
                if new_in_page == 0 {
                    consecutive_duplicate_pages += 1;
                    // Two all-duplicate pages in a row: we caught up with a
                    // previous run.
                    if consecutive_duplicate_pages >= 2 {
                        debug!(pages_consumed, "Caught up with stored posts");
                        break;
                    }
                } else {
                    consecutive_duplicate_pages = 0;
                }
            }
            cursor = Some(next_cursor);
        }

        // Expand triggered conversations after the pagination loop, each at
        // most once per run.
        let mut expansion_count = 0usize;
        for (i, conversation_id) in pending_expansions.iter().enumerate() {
            if i > 0 {
                if let Some(pace) = options.expansion_pace {
                    tokio::time::sleep(pace.jittered()).await;
                }
            }
            match thread::expand_conversation(backend, db, timeline_key, conversation_id).await {
                Ok(posts) => {
                    for post in posts {
                        if seen_this_run.insert(post.id.clone()) {
                            expansion_count += 1;
                            yield RunEvent::Post(post);
                        }
                    }
                }
                // Store failures stay fatal; anything else degrades to a
                // warning and the triggering post stays stored un-expanded.
                Err(ScrapeError::Store(e)) => Err(ScrapeError::Store(e))?,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Thread expansion failed");
                    yield RunEvent::Warning(RunWarning::ThreadExpansionFailed {
                        conversation_id: conversation_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        finish_run(db, target, timeline_key, newest_id.as_deref(), oldest_id.as_deref()).await?;
        info!(
            timeline = %timeline_key,
            pages = pages_consumed,
            new_posts = emitted,
            thread_posts = expansion_count,
            "Run complete"
        );
    }
}

/// Record the completed run, creating the timeline row on first scrape so
/// later reads can tell "never scraped" from "scraped but empty".
async fn finish_run(
    db: &Database,
    target: &Target,
    timeline_key: &str,
    newest_id: Option<&str>,
    oldest_id: Option<&str>,
) -> Result<(), ScrapeError> {
    db::update_timeline_info(
        db.pool(),
        timeline_key,
        &target.canonical_url(),
        target.kind(),
        newest_id,
        oldest_id,
    )
    .await
    .map_err(ScrapeError::Store)
}

fn max_age_cutoff(options: &ScrapeOptions) -> Option<DateTime<Utc>> {
    options.max_age.and_then(|max_age| {
        chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
    })
}

async fn fetch_page_with_retry(
    backend: &dyn TimelineBackend,
    target: &Target,
    cursor: Option<&Cursor>,
    retry: &RetryPolicy,
) -> Result<FetchPage, ScrapeError> {
    let attempts = retry.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = retry.delay_for(attempt);
            debug!(attempt, ?delay, "Retrying page fetch");
            tokio::time::sleep(delay).await;
        }
        match backend.fetch_page(target, cursor).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                warn!(timeline = %target.key(), attempt, error = %format!("{e:#}"), "Page fetch failed");
                last_error = format!("{e:#}");
            }
        }
    }

    Err(ScrapeError::BackendUnavailable {
        attempts,
        message: last_error,
    })
}
