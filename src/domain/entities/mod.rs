//! Domain entity definitions.

mod cache_entry;
mod cache_key;
mod credential;
mod download;
mod image_request;

pub use cache_entry::{CacheEntry, decode_image, decode_or_placeholder};
pub use cache_key::CacheKey;
pub use credential::Credential;
pub use download::{
    CacheType, DownloadEvent, DownloadOutcome, ImageResult, OperationId, OperationState,
    RequestCachePolicy, RetrieveOptions,
};
pub use image_request::{IMAGE_ACCEPT, IMAGE_CONTENT_TYPE, ImageRequest, RequestCustomizer};
