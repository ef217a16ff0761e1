use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CacheBackend, CacheEntry, CacheError};

const SCAN_BATCH: usize = 200;

/// Redis-backed cache. Entries are stored as JSON with a `PX` expiry so
/// Redis evicts them on its own; `purge_expired` sweeps what it missed.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Parses the URL only. The connection is opened on first use and
    /// reopened after an error.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            connection: Mutex::new(None),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        debug!("Opened Redis connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects.
    async fn reset(&self) {
        *self.connection.lock().await = None;
    }

    async fn guarded<T>(&self, result: redis::RedisResult<T>) -> Result<T, CacheError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.reset().await;
                Err(unavailable(e))
            }
        }
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = self
            .guarded(redis::cmd("GET").arg(self.namespaced(key)).query_async(&mut conn).await)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        if entry.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let ttl_ms = (entry.expires_at - Utc::now()).num_milliseconds();
        if ttl_ms <= 0 {
            // already expired
            return self.delete(&entry.key).await.map(|_| ());
        }

        let payload = serde_json::to_string(&entry).map_err(|e| CacheError::Corrupt {
            key: entry.key.clone(),
            message: e.to_string(),
        })?;

        let mut conn = self.connection().await?;
        let _: () = self
            .guarded(
                redis::cmd("SET")
                    .arg(self.namespaced(&entry.key))
                    .arg(payload)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .guarded(redis::cmd("DEL").arg(self.namespaced(key)).query_async(&mut conn).await)
            .await?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        let mut evicted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .guarded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await,
                )
                .await?;

            for key in keys {
                let ttl: i64 = self
                    .guarded(redis::cmd("PTTL").arg(&key).query_async(&mut conn).await)
                    .await?;

                // -1: no expiry set, -2: gone already
                let stale = match ttl {
                    -1 => true,
                    -2 => false,
                    _ => {
                        let raw: Option<String> = self
                            .guarded(redis::cmd("GET").arg(&key).query_async(&mut conn).await)
                            .await?;
                        raw.and_then(|r| serde_json::from_str::<CacheEntry>(&r).ok())
                            .map(|entry| entry.is_expired(now))
                            .unwrap_or(false)
                    }
                };

                if stale {
                    let removed: i64 = self
                        .guarded(redis::cmd("DEL").arg(&key).query_async(&mut conn).await)
                        .await?;
                    evicted += removed as usize;
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if evicted > 0 {
            info!("🗑️ Evicted {} stale Redis keys", evicted);
        }
        Ok(evicted)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = self.guarded(redis::cmd("PING").query_async(&mut conn).await).await?;
        Ok(())
    }
}
