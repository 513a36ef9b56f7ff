//! Key/value cache used for variety history, nutrition lookups, quotas and
//! generation locks.
//!
//! Every operation is a single-key atomic write except `delete_pattern`, which
//! is only used for bulk invalidation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cached value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Stores `value` only when `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Deletes `key` only while it still holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    /// Resets the expiry of `key` to `ttl` only while it still holds `value`.
    async fn expire_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Deletes every key matching a glob pattern (`*` wildcard). Returns the count.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Increments a counter, starting its expiry window on the first increment.
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<u64, CacheError>;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

/// Drops everything cached for one user (variety history, quotas, locks).
pub async fn clear_user_cache(cache: &dyn CacheStore, user_id: uuid::Uuid) -> u64 {
    let patterns = [
        format!("variety:{user_id}"),
        format!("ratelimit:*:{user_id}"),
        format!("lock:generation:{user_id}"),
    ];
    let mut total = 0;
    for pattern in &patterns {
        match cache.delete_pattern(pattern).await {
            Ok(n) => total += n,
            Err(e) => tracing::warn!("cache invalidation failed for {pattern}: {e}"),
        }
    }
    tracing::info!("Cleared {} cache keys for user {}", total, user_id);
    total
}

// ── Redis ──────────────────────────────────────────────────────────────────

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed store. Keys are namespaced by environment (`production:variety:...`).
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
    prefix: String,
}

impl RedisCache {
    pub fn new(conn: redis::aio::MultiplexedConnection, environment: &str) -> Self {
        Self {
            conn,
            prefix: format!("{environment}:"),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(self.key(key))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn expire_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let extended: i64 = redis::Script::new(COMPARE_AND_EXPIRE)
            .key(self.key(key))
            .arg(value)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = self.key(pattern);
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += removed;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(deleted)
    }

    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let count: u64 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;

        if count == 1 {
            // Set TTL only on first increment to avoid resetting the window on each attempt
            let _: Result<(), _> = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(window.as_secs().max(1))
                .query_async(&mut conn)
                .await;
        }
        Ok(count)
    }
}

// ── In-process ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local store for tests and single-process tools.
///
/// Expiry follows the tokio clock, so paused-time tests can advance past TTLs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.expires_at <= now) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        let was_live = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(was_live)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        let holds_value = live(&mut entries, key).is_some_and(|e| e.value == value);
        if holds_value {
            entries.remove(key);
        }
        Ok(holds_value)
    }

    async fn expire_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) if entry.value == value => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let mut expired = 0;
        entries.retain(|k, e| {
            if e.expires_at <= now {
                expired += 1;
                return false;
            }
            !glob_match(pattern, k)
        });
        Ok((before - entries.len() - expired) as u64)
    }

    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        if let Some(e) = live(&mut entries, key) {
            let count = e.value.parse::<u64>().unwrap_or(0) + 1;
            e.value = count.to_string();
            return Ok(count);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: "1".into(),
                expires_at: Instant::now() + window,
            },
        );
        Ok(1)
    }
}

/// Redis-style glob supporting `*` only.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}
