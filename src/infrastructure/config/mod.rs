//! Library configuration.

pub mod app_config;
pub mod storage;

pub use app_config::{CacheSettings, DownloadSettings, ImageKitConfig, LogLevel, LoggingConfig};
pub use storage::ConfigStore;
