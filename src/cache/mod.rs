//! Response cache for GET requests.
//!
//! Entries are keyed by method, normalized URL and a body hash. Mutating
//! requests clear every entry under their path prefix before they are sent.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::transport::HttpMethod;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
/// Default idle lifetime.
pub const DEFAULT_CACHE_IDLE: Duration = Duration::from_secs(480);
/// Default capacity in megabytes.
pub const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 8;

/// Cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Whether GET responses are cached at all.
    pub enabled: bool,
    /// Time-to-live from insertion.
    pub ttl: Duration,
    /// Time-to-idle since last access.
    pub idle: Duration,
    /// Capacity in megabytes of key and body bytes.
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: DEFAULT_CACHE_TTL,
            idle: DEFAULT_CACHE_IDLE,
            max_size_mb: DEFAULT_CACHE_MAX_SIZE_MB,
        }
    }
}

/// Snapshot of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// When the snapshot was stored.
    pub inserted_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Snapshot taken now.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            inserted_at: Utc::now(),
        }
    }

    fn weight(&self, key: &str) -> u32 {
        u32::try_from(key.len() + self.body.len()).unwrap_or(u32::MAX)
    }
}

/// Pluggable response cache.
///
/// `delete` and `clear_prefix` take effect before they return, so a `set`
/// racing with them can never resurrect a removed entry that was stored
/// earlier.
pub trait ResponseCache: Send + Sync {
    /// Fresh entry for `key`; expired entries are misses.
    fn get(&self, key: &str) -> Option<CachedResponse>;

    /// Stores a snapshot.
    fn set(&self, key: String, value: CachedResponse);

    /// Removes one entry.
    fn delete(&self, key: &str);

    /// Removes every entry whose key starts with `prefix`.
    fn clear_prefix(&self, prefix: &str);

    /// False for caches that never store anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl ResponseCache for NoopCache {
    fn get(&self, _key: &str) -> Option<CachedResponse> {
        None
    }

    fn set(&self, _key: String, _value: CachedResponse) {}

    fn delete(&self, _key: &str) {}

    fn clear_prefix(&self, _prefix: &str) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// In-memory cache with TTL, idle expiry and byte-weighted capacity.
pub struct MokaResponseCache {
    inner: Cache<String, CachedResponse>,
}

impl MokaResponseCache {
    /// Builds the cache; `None` when the settings cannot hold anything.
    pub fn new(config: &CacheConfig) -> Option<Self> {
        if config.ttl.is_zero() || config.idle.is_zero() || config.max_size_mb == 0 {
            return None;
        }
        let capacity = config.max_size_mb.checked_mul(1024 * 1024)?;

        let inner = Cache::builder()
            .max_capacity(capacity)
            .weigher(|key: &String, value: &CachedResponse| value.weight(key))
            .time_to_live(config.ttl)
            .time_to_idle(config.idle)
            .build();

        Some(Self { inner })
    }
}

impl ResponseCache for MokaResponseCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        self.inner.get(key)
    }

    fn set(&self, key: String, value: CachedResponse) {
        self.inner.insert(key, value);
    }

    fn delete(&self, key: &str) {
        self.inner.invalidate(key);
    }

    fn clear_prefix(&self, prefix: &str) {
        let doomed: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in doomed {
            self.inner.invalidate(key.as_str());
        }
    }
}

/// Builds the configured cache, degrading to [`NoopCache`] when disabled or
/// misconfigured.
pub fn build_cache(config: &CacheConfig) -> Arc<dyn ResponseCache> {
    if !config.enabled {
        return Arc::new(NoopCache);
    }
    match MokaResponseCache::new(config) {
        Some(cache) => {
            tracing::debug!(
                ttl_secs = config.ttl.as_secs(),
                idle_secs = config.idle.as_secs(),
                max_size_mb = config.max_size_mb,
                "Response cache enabled"
            );
            Arc::new(cache)
        }
        None => {
            tracing::warn!(
                ttl_secs = config.ttl.as_secs(),
                idle_secs = config.idle.as_secs(),
                max_size_mb = config.max_size_mb,
                "Invalid cache settings, caching disabled"
            );
            Arc::new(NoopCache)
        }
    }
}

/// Cache key: method, URL with sorted query, and body digest when present.
pub fn cache_key(method: HttpMethod, url: &Url, body: Option<&[u8]>) -> String {
    let mut key = format!("{} {}", method, path_of(url));

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        key.push('?');
        key.push_str(&query);
    }

    if let Some(body) = body.filter(|b| !b.is_empty()) {
        key.push('#');
        key.push_str(&hex::encode(Sha256::digest(body)));
    }
    key
}

/// Prefixes to clear before a mutating request to `url` is sent: the
/// resource itself and its parent collection.
pub fn invalidation_prefixes(url: &Url) -> Vec<String> {
    let path = path_of(url);
    let mut prefixes = vec![format!("{} {}", HttpMethod::Get, path)];

    let trimmed = path.trim_end_matches('/');
    if let Some(idx) = trimmed.rfind('/') {
        let parent = &trimmed[..idx];
        if parent.len() > url.origin().ascii_serialization().len() {
            prefixes.push(format!("{} {}", HttpMethod::Get, parent));
        }
    }
    prefixes
}

fn path_of(url: &Url) -> String {
    let mut bare = url.clone();
    bare.set_query(None);
    bare.set_fragment(None);
    bare.to_string()
}
