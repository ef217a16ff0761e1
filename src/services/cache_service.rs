use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{env_optional, env_parse, env_string, ConfigError, EnvLookup};
use crate::external::data_source::{DataSourceError, ResourceType};
use crate::store::{CacheBackend, CacheEntry, CacheError, MemoryCache, RedisCache};

type SharedFetch = Shared<BoxFuture<'static, Result<Lookup, DataSourceError>>>;

/// Time-to-live per kind of cached payload.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub fields: Duration,
    pub activities: Duration,
    pub crops: Duration,
    /// Processed `agworld:<resource>:latest` snapshots.
    pub snapshot: Duration,
    pub report: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            fields: Duration::from_secs(3600),
            activities: Duration::from_secs(1800),
            crops: Duration::from_secs(3600),
            snapshot: Duration::from_secs(3600),
            report: Duration::from_secs(86_400),
        }
    }
}

impl CacheTtls {
    pub fn for_resource(&self, resource: ResourceType) -> Duration {
        match resource {
            ResourceType::Fields => self.fields,
            ResourceType::Activities => self.activities,
            ResourceType::Crops => self.crops,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// In-memory cache when unset.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttls: CacheTtls,
    /// Pings tried before worker or scheduler give up at startup.
    pub readiness_attempts: u32,
    pub readiness_delay: Duration,
}

impl CacheConfig {
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        let defaults = CacheTtls::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(env_parse(lookup, key, default.as_secs())?))
        };

        Ok(Self {
            redis_url: env_optional(lookup, "REDIS_URL"),
            key_prefix: env_string(lookup, "CACHE_KEY_PREFIX", "agworld-reporter:"),
            ttls: CacheTtls {
                fields: secs("CACHE_TTL_FIELDS_SECS", defaults.fields)?,
                activities: secs("CACHE_TTL_ACTIVITIES_SECS", defaults.activities)?,
                crops: secs("CACHE_TTL_CROPS_SECS", defaults.crops)?,
                snapshot: secs("CACHE_TTL_SNAPSHOT_SECS", defaults.snapshot)?,
                report: secs("CACHE_TTL_REPORT_SECS", defaults.report)?,
            },
            readiness_attempts: env_parse(lookup, "CACHE_READY_ATTEMPTS", 10)?,
            readiness_delay: Duration::from_millis(env_parse(lookup, "CACHE_READY_DELAY_MS", 1000)?),
        })
    }
}

/// Where a value handed out by the cache layer came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Unexpired entry.
    Cached(Value),
    /// This caller ran the upstream fetch.
    Fetched(Value),
    /// Another caller was already fetching the key; this one shared its result.
    Joined(Value),
}

impl Lookup {
    pub fn value(&self) -> &Value {
        match self {
            Lookup::Cached(v) | Lookup::Fetched(v) | Lookup::Joined(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Lookup::Cached(v) | Lookup::Fetched(v) | Lookup::Joined(v) => v,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, Lookup::Fetched(_))
    }

    /// How a caller that did not lead the flight sees the leader's result.
    fn joined(self) -> Self {
        match self {
            Lookup::Fetched(v) => Lookup::Joined(v),
            other => other,
        }
    }
}

/// Removes the single-flight entry when the leading caller is done, even if
/// its future is dropped half way.
struct FlightGuard {
    in_flight: Arc<DashMap<String, SharedFetch>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// TTL cache in front of a `CacheBackend`, with per-key single-flight.
///
/// Backend failures never surface to callers: a failed read is a miss and a
/// failed write is logged. Jobs keep working, only slower.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    in_flight: Arc<DashMap<String, SharedFetch>>,
    degraded_reads: Arc<AtomicU64>,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(DashMap::new()),
            degraded_reads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match &config.redis_url {
            Some(url) => {
                info!("🗄️  Using Redis cache backend");
                Ok(Self::new(Arc::new(RedisCache::new(url, config.key_prefix.clone())?)))
            }
            None => {
                info!("🗄️  REDIS_URL not set, using in-memory cache backend");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Reads that fell back to a miss because the backend failed.
    pub fn degraded_reads(&self) -> u64 {
        self.degraded_reads.load(Ordering::Relaxed)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(Some(entry)) => {
                debug!("Cache hit: {}", key);
                Some(entry.value)
            }
            Ok(None) => {
                debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                self.degraded_reads.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️  Cache unavailable reading {} ({}), treating as miss", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let expires_at = Utc::now() + ttl;
        self.backend
            .set(CacheEntry {
                key: key.to_string(),
                value,
                expires_at,
            })
            .await
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.backend.purge_expired(Utc::now()).await
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.backend.ping().await
    }

    /// Returns the cached value or runs `fetch`, without writing the result.
    ///
    /// Concurrent callers that miss on the same key share one `fetch`.
    pub async fn load<F, Fut>(&self, key: &str, fetch: F) -> Result<Lookup, DataSourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, DataSourceError>> + Send + 'static,
    {
        if let Some(joined) = self.join_in_flight(key).await {
            return joined;
        }
        if let Some(value) = self.get(key).await {
            return Ok(Lookup::Cached(value));
        }
        self.single_flight(key, move || {
            let pending = fetch();
            async move { pending.await.map(Lookup::Fetched) }
        })
        .await
    }

    /// Like `load`, but never serves a cached value.
    pub async fn refresh<F, Fut>(&self, key: &str, fetch: F) -> Result<Lookup, DataSourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, DataSourceError>> + Send + 'static,
    {
        if let Some(joined) = self.join_in_flight(key).await {
            return joined;
        }
        self.single_flight(key, move || {
            let pending = fetch();
            async move { pending.await.map(Lookup::Fetched) }
        })
        .await
    }

    /// Write-through read: on a miss the fetched value is stored under `key`
    /// before any waiter sees it.
    ///
    /// The leader reads the key once more after claiming the flight. A caller
    /// whose miss was read before an earlier leader's write landed then gets
    /// that value instead of fetching again.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Lookup, DataSourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, DataSourceError>> + Send + 'static,
    {
        if let Some(joined) = self.join_in_flight(key).await {
            return joined;
        }
        if let Some(value) = self.get(key).await {
            return Ok(Lookup::Cached(value));
        }

        let cache = self.clone();
        let owned_key = key.to_string();
        self.single_flight(key, move || {
            let pending = fetch();
            async move {
                if let Some(value) = cache.peek(&owned_key).await {
                    debug!("Leader found {} already written", owned_key);
                    return Ok(Lookup::Cached(value));
                }
                let value = pending.await?;
                if let Err(e) = cache.set(&owned_key, value.clone(), ttl).await {
                    warn!("⚠️  Cache unavailable writing {} ({})", owned_key, e);
                }
                Ok(Lookup::Fetched(value))
            }
        })
        .await
    }

    /// Backend read that does not count as a degraded read.
    async fn peek(&self, key: &str) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(entry) => entry.map(|e| e.value),
            Err(_) => None,
        }
    }

    async fn join_in_flight(&self, key: &str) -> Option<Result<Lookup, DataSourceError>> {
        let shared = self.in_flight.get(key).map(|flight| flight.value().clone())?;
        debug!("Joined in-flight fetch for {}", key);
        Some(shared.await.map(Lookup::joined))
    }

    async fn single_flight<F, Fut>(&self, key: &str, lead: F) -> Result<Lookup, DataSourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Lookup, DataSourceError>> + Send + 'static,
    {
        let (shared, guard) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), None),
            Entry::Vacant(slot) => {
                let shared = lead().boxed().shared();
                slot.insert(shared.clone());
                let guard = FlightGuard {
                    in_flight: self.in_flight.clone(),
                    key: key.to_string(),
                };
                (shared, Some(guard))
            }
        };

        let result = shared.await;
        match guard {
            Some(_guard) => result,
            None => {
                debug!("Joined in-flight fetch for {}", key);
                result.map(Lookup::joined)
            }
        }
    }
}

/// Cache writes buffered by a running job.
///
/// Nothing reaches the cache until `commit`, which the executor only calls
/// for a job that succeeded within its timeout.
#[derive(Debug, Default)]
pub struct StagedWrites {
    writes: Vec<(String, Value, Duration)>,
}

impl StagedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// A later write to the same key replaces the earlier one.
    pub fn set(&mut self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        self.writes.retain(|(k, _, _)| *k != key);
        self.writes.push((key, value, ttl));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(k, _, _)| k.as_str())
    }

    /// Writes every staged entry, returning how many were stored.
    pub async fn commit(self, cache: &CacheLayer) -> usize {
        let mut written = 0;
        for (key, value, ttl) in self.writes {
            match cache.set(&key, value, ttl).await {
                Ok(()) => written += 1,
                Err(e) => warn!("⚠️  Cache unavailable writing {} ({}), skipping", key, e),
            }
        }
        written
    }
}
