//! Offline reads of stored posts.
//!
//! Resolves a target to its stored posts without any network access. A
//! target that has never been scraped is `NotFound`; a scraped target with
//! no matching posts yields an empty sequence.

use crate::db::{self, Database, PostFilters, ReadOrder};
use crate::error::ScrapeError;
use crate::model::Post;
use crate::target::Target;

/// Options for a stored-post read.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub order: ReadOrder,
    pub limit: Option<u32>,
    pub filters: PostFilters,
}

/// Read stored posts for a target.
///
/// # Errors
///
/// [`ScrapeError::NotFound`] if the target was never scraped,
/// [`ScrapeError::Store`] on persistence errors.
pub async fn read(
    db: &Database,
    target: &Target,
    options: &ViewOptions,
) -> Result<Vec<Post>, ScrapeError> {
    let key = target.key();

    let info = db::get_timeline_info(db.pool(), &key)
        .await
        .map_err(ScrapeError::Store)?;
    if info.is_none() {
        return Err(ScrapeError::NotFound(key));
    }

    db::read_posts(db.pool(), &key, options.order, options.limit, &options.filters)
        .await
        .map_err(ScrapeError::Store)
}
