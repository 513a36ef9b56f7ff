use std::time::Duration;

use axum::{http::StatusCode, Json};
use serde_json::json;

use crate::services::{cache::CacheStore, rate_limit};

/// Per-user quota on generation requests (hits per hour).
///
/// Returns 429 once the user has exceeded `max_per_hour` within the window.
pub async fn check_generation_quota(
    cache: &dyn CacheStore,
    user_id: uuid::Uuid,
    max_per_hour: u64,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let key = rate_limit::generation_key(user_id);
    if !rate_limit::check_rate_limit(cache, &key, max_per_hour, Duration::from_secs(3600)).await {
        tracing::warn!("Generation quota exceeded for user {}", user_id);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many meal plan requests. Try again later." })),
        ));
    }
    Ok(())
}
