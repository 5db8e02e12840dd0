//! Fetch backends.
//!
//! The collection engine is backend-agnostic: anything implementing
//! [`TimelineBackend`] can feed it. Two implementations exist — a
//! cookie-authenticated GraphQL API client and a chromium-automation client
//! that intercepts the web app's own GraphQL traffic. All session and
//! credential state is pushed into backend construction from [`Config`];
//! the engine never sees it.

pub mod api;
pub mod browser;
pub mod graphql;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::config::{BackendKind, Config};
use crate::model::{Cursor, FetchPage, SourceKind};
use crate::target::Target;

/// Capability interface for paginated timeline access.
#[async_trait]
pub trait TimelineBackend: Send + Sync {
    /// Which raw payload shape this backend produces.
    fn kind(&self) -> SourceKind;

    /// Fetch one page of raw posts, newest-first, plus the continuation
    /// cursor. `cursor` is the value a previous call returned, forwarded
    /// unchanged; `None` requests the first page. A `None` cursor in the
    /// result means the source is exhausted.
    async fn fetch_page(&self, target: &Target, cursor: Option<&Cursor>) -> Result<FetchPage>;

    /// Fetch a full conversation by its root id. Order is not guaranteed;
    /// callers sort after normalization.
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Vec<Value>>;
}

/// Create a backend from configuration.
///
/// # Errors
///
/// Returns an error if the backend's HTTP client cannot be constructed.
pub fn create_backend(config: &Config) -> Result<Arc<dyn TimelineBackend>> {
    match config.backend {
        BackendKind::Api => Ok(Arc::new(api::ApiBackend::new(config)?)),
        BackendKind::Browser => Ok(Arc::new(browser::BrowserBackend::new(config))),
    }
}

/// A human-like delay in the given range, used by backends to pace
/// consecutive upstream requests.
pub(crate) fn pacing_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}
