//! Key/value cache with optional expiry.
//!
//! `memory` keeps entries in process; `redis://host:6379?db=2` uses a Redis
//! connection manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bedrock_core::{ConnectionUrl, UrlError};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AdapterError, AdapterResult};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> AdapterResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AdapterResult<()>;

    async fn delete(&self, key: &str) -> AdapterResult<()>;

    async fn exists(&self, key: &str) -> AdapterResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// JSON helpers available on every cache.
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T>(&self, key: &str) -> AdapterResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> AdapterResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// In-process cache.
///
/// Expired entries are dropped when read, and all of them are swept on a
/// write once `sweep_interval` has passed since the last sweep.
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    sweep_interval: Duration,
}

struct MemoryInner {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            sweep_interval,
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.lock().entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held in memory, expired ones not yet swept included.
    pub fn stored(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> AdapterResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AdapterResult<()> {
        let now = Instant::now();
        let expires_at = ttl.map(|t| now + t);
        let mut inner = self.inner.lock();
        if now.duration_since(inner.last_sweep) >= self.sweep_interval {
            let before = inner.entries.len();
            inner.entries.retain(|_, e| e.is_live(now));
            inner.last_sweep = now;
            tracing::trace!(removed = before - inner.entries.len(), "memory cache swept");
        }
        inner
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> AdapterResult<()> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }
}

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &ConnectionUrl) -> AdapterResult<Self> {
        let client = redis::Client::open(redis_url(url)?.as_str())?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %url.redacted(), "redis cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> AdapterResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AdapterResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> AdapterResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AdapterResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }
}

/// Rewrite Bedrock's `?db=N` option into the path form the redis client reads.
pub(crate) fn redis_url(url: &ConnectionUrl) -> AdapterResult<String> {
    let mut parsed = url::Url::parse(&url.without_params(&["db", "appName"])).map_err(|e| {
        UrlError::Invalid {
            url: url.redacted(),
            reason: e.to_string(),
        }
    })?;
    if let Some(db) = url.param("db") {
        if db.parse::<u32>().is_err() {
            return Err(AdapterError::config("redis", format!("db must be a number, got '{db}'")));
        }
        parsed.set_path(&format!("/{db}"));
    }
    Ok(parsed.to_string())
}

/// `memory` or `redis://...`.
pub async fn cache_from_url(raw: &str) -> AdapterResult<Arc<dyn Cache>> {
    let url = ConnectionUrl::parse(raw)?;
    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryCache::new())),
        "redis" | "rediss" => Ok(Arc::new(RedisCache::connect(&url).await?)),
        other => Err(UrlError::UnsupportedScheme {
            kind: "cache",
            scheme: other.to_string(),
        }
        .into()),
    }
}
