//! Cached image entity.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use tracing::warn;

use crate::domain::errors::DecodeError;

/// Raw payload plus its decoded image and timestamps.
///
/// Clones share the payload and image, so handing a clone to a caller never
/// exposes the cache's own bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload: Bytes,
    image: Arc<DynamicImage>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry, decoding the payload when no image is supplied.
    ///
    /// Decoding is CPU bound; callers on an async runtime should build entries
    /// inside `spawn_blocking`.
    #[must_use]
    pub fn new(
        payload: Bytes,
        image: Option<Arc<DynamicImage>>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let created_at = created_at.unwrap_or(now);
        let image = image.unwrap_or_else(|| Arc::new(decode_or_placeholder(&payload)));
        Self {
            payload,
            image,
            created_at,
            last_used_at: now.max(created_at),
        }
    }

    /// Raw bytes as fetched.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decoded image. Empty (0x0) when the payload was not a decodable image.
    #[must_use]
    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.image
    }

    /// When the entry was first created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the entry was last read.
    #[must_use]
    pub const fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Memory cost of the entry, in bytes of payload.
    #[must_use]
    pub fn cost(&self) -> usize {
        self.payload.len()
    }

    /// Records a read at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now.max(self.created_at);
    }

    /// Time elapsed since creation. Clock skew into the future counts as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Returns true while the entry is younger than `stale_interval`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, stale_interval: Duration) -> bool {
        self.age(now) < stale_interval
    }

    /// Returns true if the decoded image is the empty placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// Decodes an image payload.
///
/// # Errors
/// Returns error if the format is unknown or the data is corrupt.
pub fn decode_image(payload: &[u8]) -> Result<DynamicImage, DecodeError> {
    image::load_from_memory(payload).map_err(|e| DecodeError::new(e.to_string()))
}

/// Decodes an image payload, substituting an empty image on failure.
#[must_use]
pub fn decode_or_placeholder(payload: &[u8]) -> DynamicImage {
    decode_image(payload).unwrap_or_else(|e| {
        warn!(size = payload.len(), error = %e, "Payload is not a decodable image, using placeholder");
        DynamicImage::new_rgba8(0, 0)
    })
}
