//! Domain error types.

mod cache_error;
mod config_error;
mod fetch_error;
mod setup_error;

pub use cache_error::{CacheInitError, DecodeError, DiskError};
pub use config_error::ConfigError;
pub use fetch_error::FetchError;
pub use setup_error::SetupError;
