//! Memoized analysis results
//!
//! Deterministic analyses keyed by `(analysis_type, input)` are cached so
//! repeated upstream calls can be skipped. Keys are stable hashes over a
//! canonical serialization of the input; entries carry a TTL and are
//! evicted lazily: an expired entry simply stops answering and is
//! overwritten by the next `put`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Cached analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Stable identifier: `{analysis_type}_{input_hash}`
    pub cache_key: String,
    /// Kind of analysis that produced the result
    pub analysis_type: String,
    /// Hex digest of the canonicalized input
    pub input_hash: String,
    /// The memoized result, opaque to the cache
    pub result: Value,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
    /// How many times the entry has answered a lookup
    pub access_count: u64,
    /// When the entry last answered a lookup
    pub last_accessed: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether the entry still answers lookups at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at < ttl
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A fresh entry answered; the stored result is returned verbatim
    Hit(Value),
    /// No fresh entry exists (absent, expired, or unreadable)
    Miss,
}

impl CacheLookup {
    /// True when the lookup produced a result
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Computes the stable cache key and input hash for a lookup
///
/// The input is serialized with keys sorted (serde_json's default object
/// ordering), prefixed by the analysis type, and hashed with SHA-256, so
/// logically equal inputs produce identical keys regardless of field
/// insertion order.
pub fn cache_key(analysis_type: &str, input: &Value) -> (String, String) {
    let canonical = input.to_string();
    let mut hasher = Sha256::new();
    hasher.update(analysis_type.as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonical.as_bytes());
    let input_hash = format!("{:x}", hasher.finalize());
    let key = format!("{}_{}", analysis_type, input_hash);
    (key, input_hash)
}

/// In-memory index of cached analysis results
///
/// Thread-safe; the interior lock is held only for individual map
/// operations, never across persistence calls.
pub struct AnalysisCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl AnalysisCache {
    /// Creates a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// The configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a result, overwriting any previous entry for the key
    ///
    /// Returns the stored entry so the caller can persist it.
    pub fn put(&self, analysis_type: &str, input: &Value, result: Value) -> CacheEntry {
        let (key, input_hash) = cache_key(analysis_type, input);
        let entry = CacheEntry {
            cache_key: key.clone(),
            analysis_type: analysis_type.to_string(),
            input_hash,
            result,
            created_at: Utc::now(),
            access_count: 0,
            last_accessed: None,
        };
        self.entries
            .lock()
            .unwrap()
            .insert(key, entry.clone());
        entry
    }

    /// Looks up a fresh entry in the in-memory index
    ///
    /// Bumps `access_count`/`last_accessed` on a hit. Expired entries are
    /// left in place (lazy eviction) and report a miss.
    pub fn get(&self, analysis_type: &str, input: &Value) -> CacheLookup {
        let (key, _) = cache_key(analysis_type, input);
        self.get_by_key(&key)
    }

    /// Key-based variant of [`AnalysisCache::get`]
    pub fn get_by_key(&self, key: &str) -> CacheLookup {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(entry) if entry.is_fresh(Utc::now(), self.ttl) => {
                entry.access_count += 1;
                entry.last_accessed = Some(Utc::now());
                CacheLookup::Hit(entry.result.clone())
            }
            _ => CacheLookup::Miss,
        }
    }

    /// Promotes an entry loaded from persistence into the index
    ///
    /// The entry is recorded as accessed once, mirroring the lookup that
    /// triggered the load. Returns the result for the caller.
    pub fn promote(&self, mut entry: CacheEntry) -> Value {
        entry.access_count += 1;
        entry.last_accessed = Some(Utc::now());
        let result = entry.result.clone();
        self.entries
            .lock()
            .unwrap()
            .insert(entry.cache_key.clone(), entry);
        result
    }

    /// Number of entries currently indexed, fresh or stale
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
