//! Cache error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to set up a cache namespace. Fatal to constructing a cache.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CacheInitError {
    #[error("no cache directory available on this platform")]
    NoCacheDirectory,

    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache namespace {0:?}")]
    InvalidNamespace(String),
}

/// Payload could not be interpreted as an image.
///
/// Soft failure: the entry is still cached with a placeholder image.
#[derive(Debug, Clone, Error)]
#[error("decode error: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a decode error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Disk tier failure. Logged by the cache, never returned to callers.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DiskError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache key {0:?} is not a plain file name")]
    UnsafeKey(String),
}

impl DiskError {
    /// Wraps an I/O error with the path it occurred on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the underlying error is a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } | Self::Persist { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            Self::UnsafeKey(_) => false,
        }
    }
}
