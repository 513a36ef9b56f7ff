use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::cache::{CacheError, CacheStore};

/// Proof of lock ownership. Only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

/// Cross-process mutual exclusion with a TTL, so a crashed holder cannot
/// block the key forever.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// `None` when someone else holds a live lock on `key`. Never waits.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, CacheError>;

    /// Pushes the expiry of a held lock to `ttl` from now. False when the
    /// lock already expired or changed hands.
    async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<bool, CacheError>;

    /// Returns false when the lock had already expired or changed hands.
    async fn release(&self, guard: &LockGuard) -> Result<bool, CacheError>;
}

/// Lock built on any `CacheStore`: SET NX with a random token, released with
/// compare-and-delete.
#[derive(Clone)]
pub struct CacheLock {
    cache: Arc<dyn CacheStore>,
}

impl CacheLock {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl DistributedLock for CacheLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, CacheError> {
        let token = Uuid::new_v4().to_string();
        if self.cache.set_if_absent(key, &token, ttl).await? {
            Ok(Some(LockGuard {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<bool, CacheError> {
        self.cache.expire_if_equals(&guard.key, &guard.token, ttl).await
    }

    async fn release(&self, guard: &LockGuard) -> Result<bool, CacheError> {
        self.cache.delete_if_equals(&guard.key, &guard.token).await
    }
}

pub fn generation_lock_key(user_id: Uuid) -> String {
    format!("lock:generation:{user_id}")
}
