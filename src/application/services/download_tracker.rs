//! Per-consumer download tracking.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use tracing::debug;

use crate::domain::entities::{CacheType, ImageResult, OperationId, RetrieveOptions};
use crate::domain::errors::FetchError;
use crate::domain::ports::ImageRetriever;

/// Tracks the downloads started on behalf of one consumer, such as a view
/// that is about to be reused for different content.
///
/// Cancelling or invalidating forgets every tracked download; results that
/// arrive for forgotten downloads are reported as
/// [`ImageResult::CanceledOrInvalidated`].
pub struct DownloadTracker {
    retriever: Arc<dyn ImageRetriever>,
    active: Mutex<HashSet<OperationId>>,
}

impl std::fmt::Debug for DownloadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTracker")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl DownloadTracker {
    /// Creates a tracker with no active downloads.
    #[must_use]
    pub fn new(retriever: Arc<dyn ImageRetriever>) -> Self {
        Self {
            retriever,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Loads an image by URL string.
    ///
    /// An unparseable URL yields [`ImageResult::Error`] without a download.
    pub async fn load(&self, url: &str, cache_type: CacheType) -> ImageResult {
        match Url::parse(url) {
            Ok(url) => self.load_url(url, cache_type).await,
            Err(e) => ImageResult::Error(FetchError::invalid_url(url, e.to_string())),
        }
    }

    /// Loads an image under a fresh tracked identifier.
    pub async fn load_url(&self, url: Url, cache_type: CacheType) -> ImageResult {
        let id = OperationId::generate();
        self.active.lock().insert(id.clone());

        let options = RetrieveOptions::new(cache_type).with_identifier(id.clone());
        let result = self.retriever.retrieve_image(url, options).await;

        if self.active.lock().remove(&id) {
            result
        } else {
            debug!(id = %id, "Dropping result of forgotten download");
            ImageResult::CanceledOrInvalidated
        }
    }

    /// Cancels every tracked download.
    pub fn cancel(&self) {
        for id in self.take_active() {
            self.retriever.cancel_download(&id);
        }
    }

    /// Invalidates every tracked download. They finish in the background.
    pub fn invalidate(&self) {
        for id in self.take_active() {
            self.retriever.invalidate_download(&id);
        }
    }

    /// Number of downloads in progress.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn take_active(&self) -> Vec<OperationId> {
        self.active.lock().drain().collect()
    }
}
