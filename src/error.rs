use thiserror::Error;

/// Errors surfaced by the collection engine and the view layer.
///
/// Record-level failures (`MalformedPayload`) are contained by the engine:
/// the offending record is skipped and the run continues. Run-level failures
/// (`BackendUnavailable`, `Store`) terminate the run; everything emitted and
/// stored before the failure remains committed.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A raw record was missing required fields or could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The fetch backend kept failing after the configured retries.
    #[error("backend unavailable after {attempts} attempts: {message}")]
    BackendUnavailable { attempts: u32, message: String },

    /// The persistence layer failed. Each upsert is its own atomic unit, so
    /// there is no partial-write ambiguity: committed rows stay valid.
    #[error("store failure: {0:#}")]
    Store(anyhow::Error),

    /// The target has never been scraped. Distinct from an empty result:
    /// a previously-scraped target with no matching posts yields an empty
    /// sequence, not this error.
    #[error("no stored data for target {0}")]
    NotFound(String),
}
