//! Download identifiers, policies and outcomes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::RequestCustomizer;
use crate::domain::errors::FetchError;

/// Identifier of a submitted download, used for cancellation and invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(String);

impl OperationId {
    /// Creates an identifier from a caller-chosen string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lifecycle of a fetch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationState {
    /// Queued, waiting for a worker slot.
    Pending = 0,
    /// Network call in flight.
    Running = 1,
    /// Canceled before a result was delivered.
    Canceled = 2,
    /// Network call finished and its outcome was delivered.
    Completed = 3,
}

impl OperationState {
    /// Returns true for states that accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Completed)
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Canceled,
            _ => Self::Completed,
        }
    }
}

/// How the outgoing request treats transport-level caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestCachePolicy {
    /// Let the transport apply its usual HTTP caching rules.
    #[default]
    UseProtocolCachePolicy,
    /// Bypass any transport cache and hit the origin.
    ReloadIgnoringCache,
}

/// Cache behaviour requested by `retrieve_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// Serve a cached entry younger than the stale interval, otherwise download.
    #[default]
    Automatic,
    /// Serve any cached entry regardless of age, download only on a miss.
    ForceCache,
    /// Always download, ignoring cached data.
    ForceDownload,
    /// Always download, letting the transport's HTTP cache answer if it can.
    Protocol,
    /// Never download. A miss yields [`ImageResult::CanceledOrInvalidated`].
    FromCache,
}

/// Optional arguments to `retrieve_image`.
#[derive(Clone, Default)]
pub struct RetrieveOptions {
    /// Cache behaviour.
    pub cache_type: CacheType,
    /// Hook applied to the request right before submission.
    pub customizer: Option<RequestCustomizer>,
    /// Identifier for cancel and invalidate. A random one is used if absent.
    pub identifier: Option<OperationId>,
}

impl RetrieveOptions {
    /// Options with the given cache type and nothing else.
    #[must_use]
    pub fn new(cache_type: CacheType) -> Self {
        Self {
            cache_type,
            ..Self::default()
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_identifier(mut self, id: OperationId) -> Self {
        self.identifier = Some(id);
        self
    }

    /// Sets the request customizer.
    #[must_use]
    pub fn with_customizer(mut self, customizer: RequestCustomizer) -> Self {
        self.customizer = Some(customizer);
        self
    }
}

impl fmt::Debug for RetrieveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrieveOptions")
            .field("cache_type", &self.cache_type)
            .field("customizer", &self.customizer.is_some())
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// Terminal outcome of a single fetch operation.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Canceled before completion.
    Canceled,
    /// The network call failed.
    Error(FetchError),
    /// The network call succeeded.
    Success {
        /// Decoded image, empty if the bytes were not decodable.
        image: Arc<DynamicImage>,
        /// Raw response body.
        bytes: Bytes,
    },
}

impl DownloadOutcome {
    /// Returns true for the success variant.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Event delivered exactly once per submitted download.
#[derive(Debug)]
pub struct DownloadEvent {
    /// Operation identifier.
    pub id: OperationId,
    /// Terminal outcome.
    pub outcome: DownloadOutcome,
    /// Set when the caller invalidated the operation before it completed.
    pub invalidated: bool,
}

/// Result of `retrieve_image`.
#[derive(Debug)]
pub enum ImageResult {
    /// Canceled, invalidated, or a cache-only miss.
    CanceledOrInvalidated,
    /// The download failed.
    Error(FetchError),
    /// Image from cache or network.
    Image {
        /// Decoded image.
        image: Arc<DynamicImage>,
        /// Raw bytes.
        bytes: Bytes,
    },
}

impl ImageResult {
    /// Returns the image bytes if present.
    #[must_use]
    pub const fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Image { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Returns true if an image was produced.
    #[must_use]
    pub const fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

impl From<DownloadEvent> for ImageResult {
    fn from(event: DownloadEvent) -> Self {
        if event.invalidated {
            return Self::CanceledOrInvalidated;
        }
        match event.outcome {
            DownloadOutcome::Canceled => Self::CanceledOrInvalidated,
            DownloadOutcome::Error(e) => Self::Error(e),
            DownloadOutcome::Success { image, bytes } => Self::Image { image, bytes },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            OperationState::Pending,
            OperationState::Running,
            OperationState::Canceled,
            OperationState::Completed,
        ] {
            assert_eq!(OperationState::from_u8(state as u8), state);
        }
        assert!(OperationState::Canceled.is_terminal());
        assert!(!OperationState::Running.is_terminal());
    }

    #[test]
    fn test_invalidated_event_maps_to_empty_result() {
        let event = DownloadEvent {
            id: OperationId::new("a"),
            outcome: DownloadOutcome::Success {
                image: Arc::new(DynamicImage::new_rgba8(1, 1)),
                bytes: Bytes::from_static(b"x"),
            },
            invalidated: true,
        };

        assert!(matches!(
            ImageResult::from(event),
            ImageResult::CanceledOrInvalidated
        ));
    }

    #[test]
    fn test_error_event_maps_to_error_result() {
        let event = DownloadEvent {
            id: OperationId::new("a"),
            outcome: DownloadOutcome::Error(FetchError::network("boom")),
            invalidated: false,
        };

        assert!(matches!(ImageResult::from(event), ImageResult::Error(_)));
    }

    #[test]
    fn test_cache_type_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: CacheType,
        }
        let parsed: Wrapper = toml::from_str("policy = \"force_download\"").unwrap();
        assert_eq!(parsed.policy, CacheType::ForceDownload);
    }
}
