//! imagekit - Tiered image fetching and caching.
//!
//! This crate retrieves images over HTTP through a serialized two-tier
//! (memory + disk) cache, with per-host request policy, a bounded download
//! pool, and cancellable, invalidatable downloads.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing consumer-facing services.
pub mod application;
/// Domain layer containing entities, errors, services and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, transports and configuration.
pub mod infrastructure;

pub use application::DownloadTracker;
pub use domain::entities::{
    CacheKey, CacheType, Credential, DownloadEvent, DownloadOutcome, ImageRequest, ImageResult,
    OperationId, RequestCachePolicy, RetrieveOptions,
};
pub use domain::errors::{CacheInitError, ConfigError, FetchError, SetupError};
pub use infrastructure::{
    CompletionSink, ConfigStore, CoordinatorConfig, DownloadCoordinator, DownloadRequest,
    ImageKitConfig, TieredCache, TieredCacheConfig, init_logging,
};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "imagekit";
