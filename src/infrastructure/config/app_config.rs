//! Library configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::image::{
    CoordinatorConfig, DEFAULT_COST_LIMIT, DEFAULT_MAX_CONCURRENT_DOWNLOADS, TieredCacheConfig,
};

const APP_NAME: &str = "imagekit";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

const SECS_PER_DAY: u64 = 24 * 3600;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageKitConfig {
    /// Cache settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Download settings.
    #[serde(default)]
    pub download: DownloadSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache namespace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Namespace directory suffix.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Parent directory for namespaces. Defaults to the platform cache dir.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Memory budget in bytes; 0 means unbounded.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: usize,

    /// Disk files idle this many days are removed on cleanup; 0 disables.
    #[serde(default = "default_auto_cleanup_days")]
    pub auto_cleanup_days: u64,

    /// Run cleanup every this many seconds in the background.
    #[serde(default)]
    pub cleanup_period_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            base_dir: None,
            memory_cost_limit: default_memory_cost_limit(),
            auto_cleanup_days: default_auto_cleanup_days(),
            cleanup_period_secs: None,
        }
    }
}

impl CacheSettings {
    /// Builds the cache configuration.
    #[must_use]
    pub fn to_cache_config(&self) -> TieredCacheConfig {
        let mut config = TieredCacheConfig::new(self.namespace.clone());
        config.base_dir.clone_from(&self.base_dir);
        config.memory_cost_limit = self.memory_cost_limit;
        config.auto_cleanup_interval =
            Duration::from_secs(self.auto_cleanup_days.saturating_mul(SECS_PER_DAY));
        config.cleanup_period = self
            .cleanup_period_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        config
    }
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Age in seconds after which `Automatic` retrieval refetches.
    #[serde(default = "default_stale_interval_secs")]
    pub stale_interval_secs: u64,

    /// Maximum downloads in flight.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            stale_interval_secs: default_stale_interval_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
        }
    }
}

impl DownloadSettings {
    /// Builds the coordinator configuration.
    #[must_use]
    pub const fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            stale_interval: Duration::from_secs(self.stale_interval_secs),
            max_concurrent_downloads: self.max_concurrent_downloads,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log verbosity level, used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl ImageKitConfig {
    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imagekit.log"))
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

const fn default_memory_cost_limit() -> usize {
    DEFAULT_COST_LIMIT
}

const fn default_auto_cleanup_days() -> u64 {
    10
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_stale_interval_secs() -> u64 {
    30
}

const fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}
