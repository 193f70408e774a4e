//! Infrastructure layer with caches, transports and configuration.

/// Library configuration.
pub mod config;
/// Image caching, transport and download coordination.
pub mod image;
/// Tracing subscriber setup.
pub mod logging;

pub use config::{ConfigStore, ImageKitConfig, LogLevel, LoggingConfig};
pub use image::{
    CacheStats, CompletionSink, CoordinatorConfig, DownloadCoordinator, DownloadRequest,
    HttpTransport, TieredCache, TieredCacheConfig,
};
pub use logging::init_logging;
