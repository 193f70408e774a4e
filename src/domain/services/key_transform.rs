//! URL to cache key mapping.

use std::num::NonZeroUsize;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::domain::entities::CacheKey;

/// Number of memoized URL encodings.
pub const DEFAULT_MEMO_CAPACITY: usize = 512;

/// Longest base64 key used as-is; longer URLs fall back to a hash.
pub const MAX_ENCODED_KEY_LEN: usize = 200;

// Decodes to a leading 0x87 byte, which no UTF-8 string starts with, so hashed
// keys never collide with encoded ones.
const HASHED_KEY_PREFIX: &str = "h-";

/// Deterministic URL to cache key transform with a bounded memo.
pub struct KeyTransform {
    memo: Mutex<LruCache<String, CacheKey>>,
}

impl KeyTransform {
    /// Creates a transform memoizing up to `capacity` URLs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            memo: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the cache key for a URL string.
    pub fn key(&self, url: &str) -> CacheKey {
        if let Some(key) = self.memo.lock().get(url) {
            return key.clone();
        }

        let key = encode_key(url);
        self.memo.lock().put(url.to_string(), key.clone());
        key
    }

    /// Number of memoized URLs.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.lock().len()
    }
}

impl Default for KeyTransform {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

impl std::fmt::Debug for KeyTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyTransform")
            .field("memoized", &self.memoized())
            .finish()
    }
}

/// Encodes a URL into a filesystem-safe key without touching any memo.
#[must_use]
pub fn encode_key(url: &str) -> CacheKey {
    let encoded = URL_SAFE_NO_PAD.encode(url.as_bytes());
    if encoded.len() <= MAX_ENCODED_KEY_LEN {
        return CacheKey::new(encoded);
    }

    let digest = Sha256::digest(url.as_bytes());
    CacheKey::new(format!("{HASHED_KEY_PREFIX}{}", hex::encode(digest)))
}
