//! Fetch-and-store of a single cache key.

use std::sync::Arc;
use tessera_core::{IMAGE_CONTENT_TYPE, ResolvedImage};
use tessera_origin::ImageFetcher;
use tessera_storage::ObjectStore;
use tracing::{debug, instrument, warn};

/// What a populate call did. Failures are reported here, never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// Object already cached and the call was not forced; origin untouched.
    Skipped,
    Stored,
    /// Origin failed or returned an incomplete body; store untouched.
    FetchFailed,
    StoreFailed,
}

impl PopulateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Stored => "stored",
            Self::FetchFailed => "fetch_failed",
            Self::StoreFailed => "store_failed",
        }
    }
}

/// Populates cache keys from their origin URLs.
#[derive(Clone)]
pub struct Populator {
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl Populator {
    pub fn new(store: Arc<dyn ObjectStore>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Make `image.key` hold the origin's current bytes.
    ///
    /// Without `force` an existing object is left alone. An existing object is
    /// deleted before the new bytes are put, and the content type is always
    /// `image/jpeg` whatever the origin claims. If the store cannot tell whether
    /// the object exists, the call proceeds as if it might.
    #[instrument(skip(self, image), fields(key = %image.key))]
    pub async fn populate(&self, image: &ResolvedImage, force: bool) -> PopulateOutcome {
        let key = image.key.to_string();

        // None when the store could not say
        let exists = match self.store.try_head(&key).await {
            Ok(meta) => Some(meta.is_some()),
            Err(e) => {
                warn!(error = %e, "Store head failed, populating anyway");
                None
            }
        };
        if exists == Some(true) && !force {
            debug!("Object already cached");
            return PopulateOutcome::Skipped;
        }

        let fetched = match self.fetcher.fetch(&image.origin_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, url = %image.origin_url, "Origin fetch failed during populate");
                return PopulateOutcome::FetchFailed;
            }
        };
        if !fetched.is_complete() {
            warn!(
                url = %image.origin_url,
                received = fetched.data.len(),
                announced = ?fetched.content_length,
                "Origin body missing or length unknown, not caching"
            );
            return PopulateOutcome::FetchFailed;
        }

        if exists != Some(false)
            && let Err(e) = self.store.delete(&key).await
        {
            warn!(error = %e, "Failed to delete stale object");
            return PopulateOutcome::StoreFailed;
        }

        let size = fetched.data.len();
        if let Err(e) = self
            .store
            .put(&key, fetched.data, IMAGE_CONTENT_TYPE)
            .await
        {
            warn!(error = %e, "Failed to store object");
            return PopulateOutcome::StoreFailed;
        }

        debug!(size, "Object stored");
        PopulateOutcome::Stored
    }
}
