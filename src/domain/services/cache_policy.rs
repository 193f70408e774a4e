//! Cache-versus-network decision for image retrieval.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::entities::{CacheEntry, CacheType, RequestCachePolicy};

/// What `retrieve_image` should do for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Answer from the cached entry.
    Serve,
    /// Fetch from the network with the given transport policy.
    Download(RequestCachePolicy),
    /// Give up without touching the network.
    Miss,
}

/// Returns true if the decision for `cache_type` depends on a cache lookup.
#[must_use]
pub const fn needs_lookup(cache_type: CacheType) -> bool {
    !matches!(cache_type, CacheType::ForceDownload | CacheType::Protocol)
}

/// Decides between the cached entry and the network.
///
/// `cached` is ignored for cache types that never read the cache. Only
/// `ForceDownload` bypasses the transport's own cache.
#[must_use]
pub fn decide(
    cache_type: CacheType,
    cached: Option<&CacheEntry>,
    now: DateTime<Utc>,
    stale_interval: Duration,
) -> CacheDecision {
    match cache_type {
        CacheType::ForceDownload => CacheDecision::Download(RequestCachePolicy::ReloadIgnoringCache),
        CacheType::Protocol => CacheDecision::Download(RequestCachePolicy::UseProtocolCachePolicy),
        CacheType::FromCache => {
            if cached.is_some() {
                CacheDecision::Serve
            } else {
                CacheDecision::Miss
            }
        }
        CacheType::ForceCache => {
            if cached.is_some() {
                CacheDecision::Serve
            } else {
                CacheDecision::Download(RequestCachePolicy::UseProtocolCachePolicy)
            }
        }
        CacheType::Automatic => match cached {
            Some(entry) if entry.is_fresh(now, stale_interval) => CacheDecision::Serve,
            _ => CacheDecision::Download(RequestCachePolicy::UseProtocolCachePolicy),
        },
    }
}
