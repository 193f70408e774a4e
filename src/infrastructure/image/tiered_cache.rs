//! Two-tier (memory + disk) cache with serialized access.
//!
//! Every operation on a cache instance is a command processed in order by one
//! background task, so store, fetch, remove and cleanup never race each other.
//! Handles are cheap to clone and may be used from any task. When the last
//! handle is dropped the task runs a final cleanup and exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, interval_at};
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheEntry, CacheKey};
use crate::domain::errors::CacheInitError;

use super::disk_tier::DiskTier;
use super::memory_tier::{CacheStats, DEFAULT_COST_LIMIT, MemoryTier};

/// Prefix of every namespace directory.
pub const CACHE_DOMAIN: &str = "imagekit";

/// Default disk staleness window (10 days).
pub const DEFAULT_AUTO_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 24 * 3600);

/// Configuration for one cache namespace.
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Namespace name; the disk tier lives in `<base_dir>/imagekit-<namespace>`.
    pub namespace: String,
    /// Parent directory of the namespace. `None` uses the platform cache dir.
    pub base_dir: Option<PathBuf>,
    /// Memory budget in payload bytes; zero means unbounded.
    pub memory_cost_limit: usize,
    /// Disk files idle longer than this are removed by cleanup. Zero disables
    /// the disk sweep.
    pub auto_cleanup_interval: Duration,
    /// Run cleanup periodically in the background.
    pub cleanup_period: Option<Duration>,
}

impl TieredCacheConfig {
    /// Creates a configuration with defaults for the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            base_dir: None,
            memory_cost_limit: DEFAULT_COST_LIMIT,
            auto_cleanup_interval: DEFAULT_AUTO_CLEANUP_INTERVAL,
            cleanup_period: None,
        }
    }

    /// Places the namespace directory under `base_dir`.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Resolves the namespace directory.
    ///
    /// # Errors
    /// Returns error if the namespace is not a plain directory name or no
    /// platform cache directory exists.
    pub fn namespace_dir(&self) -> Result<PathBuf, CacheInitError> {
        let key = CacheKey::new(self.namespace.as_str());
        if !key.is_path_safe() {
            return Err(CacheInitError::InvalidNamespace(self.namespace.clone()));
        }
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => default_cache_base().ok_or(CacheInitError::NoCacheDirectory)?,
        };
        Ok(base.join(format!("{CACHE_DOMAIN}-{}", self.namespace)))
    }
}

enum CacheCommand {
    Store {
        key: CacheKey,
        payload: Bytes,
        image: Option<Arc<DynamicImage>>,
        done: Option<oneshot::Sender<()>>,
    },
    Fetch {
        key: CacheKey,
        reply: oneshot::Sender<Option<CacheEntry>>,
    },
    Remove {
        key: CacheKey,
        done: oneshot::Sender<()>,
    },
    Cleanup {
        done: Option<oneshot::Sender<()>>,
    },
    Clear {
        done: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a two-tier cache namespace.
#[derive(Clone)]
pub struct TieredCache {
    tx: mpsc::UnboundedSender<CacheCommand>,
    namespace: Arc<str>,
    root: Arc<Path>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("namespace", &self.namespace)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl TieredCache {
    /// Opens a namespace and starts its command task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns error if the namespace directory cannot be created.
    pub fn open(config: TieredCacheConfig) -> Result<Self, CacheInitError> {
        let root = config.namespace_dir()?;
        let disk = DiskTier::open(root.clone())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = CacheWorker {
            memory: MemoryTier::new(config.memory_cost_limit),
            disk,
            auto_cleanup_interval: config.auto_cleanup_interval,
            namespace: config.namespace.clone(),
        };
        tokio::spawn(worker.run(rx, config.cleanup_period));

        info!(namespace = %config.namespace, path = %root.display(), "Opened image cache");

        Ok(Self {
            tx,
            namespace: Arc::from(config.namespace.as_str()),
            root: Arc::from(root.as_path()),
        })
    }

    /// Namespace name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Directory of the disk tier.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores a payload in both tiers and waits until it is persisted.
    ///
    /// The decoded image is derived from the payload when not supplied. Disk
    /// failures are logged, never returned.
    pub async fn store(&self, key: CacheKey, payload: Bytes, image: Option<Arc<DynamicImage>>) {
        let (done, wait) = oneshot::channel();
        if self.send(CacheCommand::Store {
            key,
            payload,
            image,
            done: Some(done),
        }) {
            let _ = wait.await;
        }
    }

    /// Queues a store without waiting for it.
    pub fn store_detached(&self, key: CacheKey, payload: Bytes, image: Option<Arc<DynamicImage>>) {
        self.send(CacheCommand::Store {
            key,
            payload,
            image,
            done: None,
        });
    }

    /// Looks a key up in memory, then on disk. Misses of any kind are `None`.
    pub async fn fetch(&self, key: &CacheKey) -> Option<CacheEntry> {
        let (reply, wait) = oneshot::channel();
        if !self.send(CacheCommand::Fetch {
            key: key.clone(),
            reply,
        }) {
            return None;
        }
        wait.await.ok().flatten()
    }

    /// Removes a key from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        let (done, wait) = oneshot::channel();
        if self.send(CacheCommand::Remove {
            key: key.clone(),
            done,
        }) {
            let _ = wait.await;
        }
    }

    /// Clears the memory tier and sweeps idle files from disk, waiting for it.
    pub async fn cleanup(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(CacheCommand::Cleanup { done: Some(done) }) {
            let _ = wait.await;
        }
    }

    /// Queues a cleanup, e.g. when the host application goes idle.
    pub fn trigger_cleanup(&self) {
        self.send(CacheCommand::Cleanup { done: None });
    }

    /// Removes every entry from both tiers.
    pub async fn clear(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(CacheCommand::Clear { done }) {
            let _ = wait.await;
        }
    }

    /// Memory tier statistics.
    pub async fn stats(&self) -> CacheStats {
        let (reply, wait) = oneshot::channel();
        if !self.send(CacheCommand::Stats { reply }) {
            return CacheStats::default();
        }
        wait.await.unwrap_or_default()
    }

    /// Runs a final cleanup and stops the command task.
    ///
    /// Other handles to the same namespace see misses afterwards.
    pub async fn shutdown(self) {
        let (done, wait) = oneshot::channel();
        if self.send(CacheCommand::Shutdown { done }) {
            let _ = wait.await;
        }
    }

    fn send(&self, command: CacheCommand) -> bool {
        if self.tx.send(command).is_err() {
            warn!(namespace = %self.namespace, "Cache task has stopped, dropping command");
            return false;
        }
        true
    }
}

/// State owned by the command task.
struct CacheWorker {
    memory: MemoryTier,
    disk: DiskTier,
    auto_cleanup_interval: Duration,
    namespace: String,
}

impl CacheWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CacheCommand>, period: Option<Duration>) {
        let mut ticker = period
            .filter(|p| !p.is_zero())
            .map(|p| interval_at(Instant::now() + p, p));

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(CacheCommand::Shutdown { done }) => {
                            self.cleanup().await;
                            let _ = done.send(());
                            break;
                        }
                        Some(cmd) => self.handle(cmd).await,
                        None => {
                            self.cleanup().await;
                            break;
                        }
                    }
                }
                () = next_tick(&mut ticker) => {
                    trace!(namespace = %self.namespace, "Periodic cleanup");
                    self.cleanup().await;
                }
            }
        }

        debug!(namespace = %self.namespace, "Cache task stopped");
    }

    async fn handle(&mut self, command: CacheCommand) {
        match command {
            CacheCommand::Store {
                key,
                payload,
                image,
                done,
            } => {
                self.store(key, payload, image).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            CacheCommand::Fetch { key, reply } => {
                let entry = self.fetch(key).await;
                let _ = reply.send(entry);
            }
            CacheCommand::Remove { key, done } => {
                self.remove(key).await;
                let _ = done.send(());
            }
            CacheCommand::Cleanup { done } => {
                self.cleanup().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            CacheCommand::Clear { done } => {
                self.memory.clear();
                let disk = self.disk.clone();
                match tokio::task::spawn_blocking(move || disk.clear()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to clear disk tier"),
                    Err(e) => error!(error = %e, "Disk clear task panicked"),
                }
                let _ = done.send(());
            }
            CacheCommand::Stats { reply } => {
                let _ = reply.send(self.memory.stats());
            }
            CacheCommand::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    async fn store(&mut self, key: CacheKey, payload: Bytes, image: Option<Arc<DynamicImage>>) {
        if !key.is_path_safe() {
            warn!(key = %key, "Refusing to store entry under unsafe key");
            return;
        }
        let entry = build_entry(payload.clone(), image, None).await;
        self.memory.put(key.clone(), entry);

        let disk = self.disk.clone();
        let size = payload.len();
        match tokio::task::spawn_blocking(move || disk.write(&key, &payload).map(|()| key)).await {
            Ok(Ok(key)) => debug!(key = %key, size, "Stored cache entry"),
            Ok(Err(e)) => warn!(error = %e, "Failed to persist cache entry to disk"),
            Err(e) => error!(error = %e, "Disk write task panicked"),
        }
    }

    async fn fetch(&mut self, key: CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(&key, now) {
            self.touch(key, now).await;
            return Some(entry);
        }

        let disk = self.disk.clone();
        let lookup = key.clone();
        let record = match tokio::task::spawn_blocking(move || disk.read(&lookup)).await {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => {
                trace!(key = %key, "Cache miss");
                return None;
            }
            Ok(Err(e)) => {
                debug!(key = %key, error = %e, "Unreadable cache file, treating as miss");
                return None;
            }
            Err(e) => {
                error!(key = %key, error = %e, "Disk read task panicked");
                return None;
            }
        };

        let mut entry = build_entry(record.payload, None, record.created_at).await;
        entry.touch(now);
        self.memory.put(key.clone(), entry.clone());
        trace!(key = %key, "Disk tier hit, repopulated memory");

        self.touch(key, now).await;
        Some(entry)
    }

    async fn remove(&mut self, key: CacheKey) {
        self.memory.remove(&key);
        let disk = self.disk.clone();
        match tokio::task::spawn_blocking(move || disk.remove(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Ignoring disk removal failure"),
            Err(e) => error!(error = %e, "Disk remove task panicked"),
        }
    }

    /// Clears memory unconditionally, then sweeps idle files unless disabled.
    async fn cleanup(&mut self) {
        self.memory.clear();

        if self.auto_cleanup_interval.is_zero() {
            trace!(namespace = %self.namespace, "Disk sweep disabled");
            return;
        }

        let disk = self.disk.clone();
        let max_age = self.auto_cleanup_interval;
        match tokio::task::spawn_blocking(move || disk.sweep(max_age, SystemTime::now())).await {
            Ok(Ok(report)) => debug!(
                namespace = %self.namespace,
                removed = report.removed,
                kept = report.kept,
                failed = report.failed,
                "Cache cleanup complete"
            ),
            Ok(Err(e)) => warn!(namespace = %self.namespace, error = %e, "Cache cleanup failed"),
            Err(e) => error!(error = %e, "Cleanup task panicked"),
        }
    }

    async fn touch(&self, key: CacheKey, now: DateTime<Utc>) {
        let disk = self.disk.clone();
        let accessed = SystemTime::from(now);
        if let Ok(Err(e)) = tokio::task::spawn_blocking(move || disk.touch(&key, accessed)).await
            && !e.is_not_found()
        {
            debug!(error = %e, "Failed to update access time");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Builds an entry off the async runtime, since decoding is CPU bound.
async fn build_entry(
    payload: Bytes,
    image: Option<Arc<DynamicImage>>,
    created_at: Option<DateTime<Utc>>,
) -> CacheEntry {
    if image.is_some() {
        return CacheEntry::new(payload, image, created_at);
    }
    let fallback = payload.clone();
    tokio::task::spawn_blocking(move || CacheEntry::new(payload, None, created_at))
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Decode task panicked");
            CacheEntry::new(
                fallback,
                Some(Arc::new(DynamicImage::new_rgba8(0, 0))),
                created_at,
            )
        })
}

/// Returns the platform cache directory for this crate.
fn default_cache_base() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "linuxmobile", CACHE_DOMAIN)
        .map(|dirs| dirs.cache_dir().to_path_buf())
}
