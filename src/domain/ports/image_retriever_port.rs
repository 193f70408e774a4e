//! Port definition for consumers that retrieve images by URL.

use async_trait::async_trait;
use reqwest::Url;

use crate::domain::entities::{ImageResult, OperationId, RetrieveOptions};

/// Port for cache-aware image retrieval with cancellation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageRetriever: Send + Sync {
    /// Retrieves an image from cache or network per `options.cache_type`.
    async fn retrieve_image(&self, url: Url, options: RetrieveOptions) -> ImageResult;

    /// Cancels every pending download with this identifier.
    fn cancel_download(&self, id: &OperationId);

    /// Invalidates every pending download with this identifier.
    fn invalidate_download(&self, id: &OperationId);
}
