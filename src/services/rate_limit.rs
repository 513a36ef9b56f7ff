use std::time::Duration;

use super::cache::CacheStore;

/// Counts one hit against `key` and reports whether it is within quota.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window`
/// - Returns false if counter exceeds `max_hits`
///
/// A cache failure lets the request through; quotas are best-effort.
pub async fn check_rate_limit(
    cache: &dyn CacheStore,
    key: &str,
    max_hits: u64,
    window: Duration,
) -> bool {
    let count = match cache.incr_with_ttl(key, window).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("rate limit counter unavailable for {key}: {e}");
            0
        }
    };
    count <= max_hits
}

pub fn generation_key(user_id: uuid::Uuid) -> String {
    format!("ratelimit:generate:{user_id}")
}

pub const NUTRITION_DB_KEY: &str = "ratelimit:usda:hourly";
