//! Domain layer with core entities, services and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Stateless and in-memory domain services.
pub mod services;

pub use entities::{CacheEntry, CacheKey, CacheType, Credential, ImageRequest, ImageResult};
pub use errors::{CacheInitError, ConfigError, DecodeError, FetchError, SetupError};
pub use ports::{ImageRetriever, ImageTransport};
pub use services::{HostPolicyStore, KeyTransform};
