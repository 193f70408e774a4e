//! Image fetching and caching infrastructure.
//!
//! This module provides:
//! - A cost-bounded memory tier and a file-per-key disk tier
//! - A serialized two-tier cache per namespace
//! - Cancellable fetch operations over a pluggable transport
//! - The download coordinator tying cache policy and network together

pub mod coordinator;
pub mod disk_tier;
pub mod http_transport;
pub mod memory_tier;
pub mod operation;
pub mod tiered_cache;

pub use coordinator::{
    CoordinatorConfig, DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_STALE_INTERVAL, DEFAULT_TIMEOUT,
    DownloadCoordinator, DownloadRequest,
};
pub use disk_tier::{DiskRecord, DiskTier, SweepReport};
pub use http_transport::HttpTransport;
pub use memory_tier::{CacheStats, DEFAULT_COST_LIMIT, MemoryTier};
pub use operation::{CompletionSink, FetchOperation, OperationHandle};
pub use tiered_cache::{CACHE_DOMAIN, DEFAULT_AUTO_CLEANUP_INTERVAL, TieredCache, TieredCacheConfig};
