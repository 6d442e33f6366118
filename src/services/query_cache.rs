// Query Result Cache Service
//
// Bounded TTL cache shared by fetch and query handlers.
// Entries are JSON values so any serializable result can be cached; expired
// entries are dropped on read and by a periodic sweeper.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::api::middleware::AppError;

/// Default time-to-live (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cached value with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    expires_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_entries: usize,
    pub keys: Vec<String>,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// TTL cache with a max-entries bound and least-recently-used eviction
///
/// Constructed explicitly and shared through `Arc`; there is no global
/// instance.
pub struct QueryCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    default_ttl: Duration,
}

impl QueryCache {
    /// Create a new cache
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Maximum number of cached entries
    /// * `default_ttl` - TTL used when `set` is called without one
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    /// Build a cache key from a prefix and request parameters
    ///
    /// Object keys are sorted recursively before hashing, so parameter
    /// order never changes the key.
    pub fn generate_key(prefix: &str, params: &Value) -> String {
        let canonical = canonicalize(params).to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{}:{}", prefix, hex::encode(hasher.finalize()))
    }

    /// Get a cached value if present and not expired
    ///
    /// An expired entry counts as a miss and is removed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                state.misses += 1;
                tracing::debug!("Cache miss for key: {}", key);
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            state.expirations += 1;
            tracing::debug!("Cache expired for key: {}", key);
            return None;
        }

        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.hit_count += 1;
        tracing::debug!("Cache hit for key: {} (hit_count: {})", key, entry.hit_count);

        match serde_json::from_value(entry.data.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached value for {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Store a value
    ///
    /// # Arguments
    ///
    /// * `key` - Cache key (see `generate_key`)
    /// * `data` - Any serializable value
    /// * `ttl` - Optional custom TTL (uses the default if None)
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<(), AppError> {
        let data = serde_json::to_value(data)
            .map_err(|e| AppError::Internal(format!("Failed to serialize cache value: {}", e)))?;
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(key) {
            Self::evict(&mut state, now);
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                last_accessed: now,
                hit_count: 0,
            },
        );

        tracing::debug!("Cached value for key: {} (cache size: {})", key, state.entries.len());
        Ok(())
    }

    /// Make room for one entry: drop an expired entry if any, else the least
    /// recently used one.
    fn evict(state: &mut CacheState, now: Instant) {
        let expired = state
            .entries
            .iter()
            .find(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone());
        if let Some(key) = expired {
            state.entries.remove(&key);
            state.expirations += 1;
            return;
        }

        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            state.entries.remove(&key);
            state.evictions += 1;
            tracing::debug!("Evicted cache entry: {}", key);
        }
    }

    /// Remove one key; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        tracing::info!("Cleared {} cache entries", count);
    }

    /// Delete every key starting with `prefix`; returns how many were removed
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::info!("Invalidated {} cache entries with prefix {}", removed, prefix);
        }
        removed
    }

    /// Read-through helper: return the cached value or compute, store and
    /// return it. Fetch errors are propagated and nothing is cached.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, fetcher: F, ttl: Option<Duration>) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(cached) = self.get::<T>(key) {
            return Ok(cached);
        }

        let value = fetcher().await?;
        self.set(key, &value, ttl)?;
        Ok(value)
    }

    /// Remove expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.expirations += removed as u64;

        if removed > 0 {
            tracing::info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Get cache statistics, including the live keys
    pub fn get_stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            size: state.entries.len(),
            max_entries: self.max_entries,
            keys,
        }
    }

    /// Get current cache size
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Run `cleanup_expired` every `interval` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.cleanup_expired();
                    }
                    None => break,
                }
            }
            tracing::debug!("Cache sweeper stopped");
        })
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1000, DEFAULT_TTL)
    }
}

/// Copy of `value` with every object's keys in sorted order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonicalize(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
