use std::env;

use crate::services::generation::EngineSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    /// Prefix applied to every cache key (`development`, `production`, ...).
    pub app_env: String,
    // Generative provider (optional: without a key every plan comes from the template)
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    // Nutrition database (optional: without a key plans are returned unverified)
    pub usda_api_key: Option<String>,
    pub usda_base_url: String,
    pub usda_timeout_secs: u64,
    pub usda_hourly_limit: u64,
    pub usda_validation_enabled: bool,
    pub nutrition_cache_ttl_secs: u64,
    pub generation_lock_ttl_secs: u64,
    pub generation_rate_limit: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            llm_temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.3".into())
                .parse()?,
            llm_max_tokens: env::var("LLM_MAX_TOKENS")
                .unwrap_or_else(|_| "6000".into())
                .parse()?,
            usda_api_key: env::var("USDA_API_KEY").ok().filter(|s| !s.is_empty()),
            usda_base_url: env::var("USDA_BASE_URL")
                .unwrap_or_else(|_| "https://api.nal.usda.gov/fdc/v1".into()),
            usda_timeout_secs: env::var("USDA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
            usda_hourly_limit: env::var("USDA_HOURLY_LIMIT")
                .unwrap_or_else(|_| "1000".into())
                .parse()?,
            usda_validation_enabled: env::var("USDA_VALIDATION_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            nutrition_cache_ttl_secs: env::var("NUTRITION_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "604800".into())
                .parse()?,
            generation_lock_ttl_secs: env::var("GENERATION_LOCK_TTL_SECS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            generation_rate_limit: env::var("GENERATION_RATE_LIMIT")
                .unwrap_or_else(|_| "20".into())
                .parse()?,
        })
    }

    /// Engine policy derived from the environment; constants not exposed as
    /// env vars keep their defaults.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            generation_timeout: std::time::Duration::from_secs(self.llm_timeout_secs),
            lookup_timeout: std::time::Duration::from_secs(self.usda_timeout_secs),
            nutrition_cache_ttl_secs: self.nutrition_cache_ttl_secs,
            lock_ttl_secs: self.generation_lock_ttl_secs,
            ..EngineSettings::default()
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
