//! Errors constructing the download stack.

use thiserror::Error;

use super::{CacheInitError, FetchError};

/// Failure to build a coordinator from configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SetupError {
    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheInitError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] FetchError),
}
