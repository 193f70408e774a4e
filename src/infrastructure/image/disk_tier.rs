//! Disk tier: one file per cache key.
//!
//! Operations here are blocking. The tiered cache runs them through
//! `spawn_blocking` from its command task, which also keeps them serialized.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheInitError, DiskError};

/// A payload read back from disk.
#[derive(Debug, Clone)]
pub struct DiskRecord {
    /// File contents.
    pub payload: Bytes,
    /// Creation time from file metadata, if the platform reports one.
    pub created_at: Option<DateTime<Utc>>,
}

/// Outcome of a staleness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files deleted for being stale.
    pub removed: usize,
    /// Files left in place.
    pub kept: usize,
    /// Files that could not be inspected or deleted.
    pub failed: usize,
}

/// Directory-backed storage of raw payloads.
#[derive(Debug, Clone)]
pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    /// Opens the tier, creating the directory if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(root: PathBuf) -> Result<Self, CacheInitError> {
        fs::create_dir_all(&root).map_err(|source| CacheInitError::CreateDir {
            path: root.clone(),
            source,
        })?;
        debug!(path = %root.display(), "Opened disk tier");
        Ok(Self { root })
    }

    /// Directory holding the files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path for a key.
    ///
    /// # Errors
    /// Returns error if the key would resolve outside the tier's directory.
    pub fn path(&self, key: &CacheKey) -> Result<PathBuf, DiskError> {
        if !key.is_path_safe() {
            return Err(DiskError::UnsafeKey(key.as_str().to_string()));
        }
        Ok(self.root.join(key.as_str()))
    }

    /// Writes a payload atomically: readers see either the old file or the new
    /// one, never a partial write.
    ///
    /// # Errors
    /// Returns error if the key is unsafe or the temporary file cannot be
    /// written or renamed.
    pub fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<(), DiskError> {
        let path = self.path(key)?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| DiskError::io(&self.root, e))?;
        temp.write_all(payload)
            .map_err(|e| DiskError::io(temp.path(), e))?;
        temp.as_file()
            .sync_data()
            .map_err(|e| DiskError::io(temp.path(), e))?;
        temp.persist(&path).map_err(|e| DiskError::Persist {
            path: path.clone(),
            source: e.error,
        })?;

        trace!(key = %key, size = payload.len(), "Wrote disk tier file");
        Ok(())
    }

    /// Reads a payload. A missing file is `Ok(None)`.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub fn read(&self, key: &CacheKey) -> Result<Option<DiskRecord>, DiskError> {
        let path = self.path(key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DiskError::io(path, e)),
        };
        if !meta.is_file() {
            return Ok(None);
        }

        let payload = fs::read(&path).map_err(|e| DiskError::io(&path, e))?;
        let created_at = meta
            .created()
            .or_else(|_| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Some(DiskRecord {
            payload: Bytes::from(payload),
            created_at,
        }))
    }

    /// Sets the file's access time, the staleness signal for sweeps.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or its times set.
    pub fn touch(&self, key: &CacheKey, accessed: SystemTime) -> Result<(), DiskError> {
        let path = self.path(key)?;
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .map_err(|e| DiskError::io(&path, e))?;
        file.set_times(fs::FileTimes::new().set_accessed(accessed))
            .map_err(|e| DiskError::io(&path, e))
    }

    /// Deletes a file. Missing files are not an error.
    ///
    /// # Errors
    /// Returns error if an existing file cannot be deleted.
    pub fn remove(&self, key: &CacheKey) -> Result<(), DiskError> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                trace!(key = %key, "Removed disk tier file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DiskError::io(path, e)),
        }
    }

    /// Returns true if a file exists for the key.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path(key).is_ok_and(|path| path.is_file())
    }

    /// Deletes every file last accessed more than `max_age` before `now`.
    ///
    /// Per-file failures are logged and counted, never returned.
    ///
    /// # Errors
    /// Returns error only if the directory itself cannot be listed.
    pub fn sweep(&self, max_age: Duration, now: SystemTime) -> Result<SweepReport, DiskError> {
        let entries = fs::read_dir(&self.root).map_err(|e| DiskError::io(&self.root, e))?;
        let mut report = SweepReport::default();

        for entry in entries {
            let Ok(entry) = entry else {
                report.failed += 1;
                continue;
            };
            let path = entry.path();
            let accessed = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta.accessed(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            let accessed = match accessed {
                Ok(accessed) => accessed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read access time, skipping");
                    report.failed += 1;
                    continue;
                }
            };

            let idle = now.duration_since(accessed).unwrap_or_default();
            if idle <= max_age {
                report.kept += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), idle_secs = idle.as_secs(), "Removed stale cache file");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale cache file");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Deletes every file in the tier.
    ///
    /// # Errors
    /// Returns error if the directory cannot be listed.
    pub fn clear(&self) -> Result<usize, DiskError> {
        let entries = fs::read_dir(&self.root).map_err(|e| DiskError::io(&self.root, e))?;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            } else {
                removed += 1;
            }
        }
        debug!(removed, "Cleared disk tier");
        Ok(removed)
    }

    /// Number of files in the tier.
    #[must_use]
    pub fn len(&self) -> usize {
        fs::read_dir(&self.root).map_or(0, |entries| {
            entries.flatten().filter(|e| e.path().is_file()).count()
        })
    }

    /// Returns true if the tier holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tier() -> (DiskTier, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::open(temp_dir.path().join("ns")).unwrap();
        (tier, temp_dir)
    }

    #[test]
    fn test_open_creates_directory() {
        let (tier, _temp) = create_tier();
        assert!(tier.root().is_dir());
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        let result = DiskTier::open(file.join("ns"));
        assert!(matches!(result, Err(CacheInitError::CreateDir { .. })));
    }

    #[test]
    fn test_write_and_read() {
        let (tier, _temp) = create_tier();
        let key = CacheKey::new("a");

        tier.write(&key, b"payload").unwrap();
        let record = tier.read(&key).unwrap().unwrap();

        assert_eq!(record.payload.as_ref(), b"payload");
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let (tier, _temp) = create_tier();
        let key = CacheKey::new("a");

        tier.write(&key, b"one").unwrap();
        tier.write(&key, b"two").unwrap();

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.read(&key).unwrap().unwrap().payload.as_ref(), b"two");
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let (tier, _temp) = create_tier();
        assert!(tier.read(&CacheKey::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_unsafe_keys_stay_inside_root() {
        let (tier, temp) = create_tier();
        let escaped = CacheKey::new("../escaped");

        assert!(matches!(tier.write(&escaped, b"x"), Err(DiskError::UnsafeKey(_))));
        assert!(matches!(tier.read(&escaped), Err(DiskError::UnsafeKey(_))));
        assert!(tier.touch(&escaped, SystemTime::now()).is_err());
        assert!(tier.remove(&escaped).is_err());
        assert!(!tier.contains(&escaped));
        assert!(!temp.path().join("escaped").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (tier, _temp) = create_tier();
        let key = CacheKey::new("a");

        tier.write(&key, b"x").unwrap();
        tier.remove(&key).unwrap();
        tier.remove(&key).unwrap();

        assert!(!tier.contains(&key));
    }

    #[test]
    fn test_sweep_removes_only_stale_files() {
        let (tier, _temp) = create_tier();
        let now = SystemTime::now();
        let day = Duration::from_secs(24 * 3600);

        tier.write(&CacheKey::new("old"), b"x").unwrap();
        tier.write(&CacheKey::new("fresh"), b"y").unwrap();
        tier.touch(&CacheKey::new("old"), now - 11 * day).unwrap();
        tier.touch(&CacheKey::new("fresh"), now - day).unwrap();

        let report = tier.sweep(10 * day, now).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.kept, 1);
        assert!(!tier.contains(&CacheKey::new("old")));
        assert!(tier.contains(&CacheKey::new("fresh")));
    }

    #[test]
    fn test_clear() {
        let (tier, _temp) = create_tier();
        tier.write(&CacheKey::new("a"), b"1").unwrap();
        tier.write(&CacheKey::new("b"), b"2").unwrap();

        assert_eq!(tier.clear().unwrap(), 2);
        assert!(tier.is_empty());
    }
}
