//! Pre-fetch nutrition facts for common foods into the shared cache
//! Run after deploys or cache flushes (e.g. 0 3 * * 1 /app/warm-nutrition-cache)
//!
//! Usage: warm-nutrition-cache [--food NAME]... [--ttl-days N]
//!   --food NAME  : Food to fetch (repeatable; built-in list if not specified)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use mealplan_api::services::{
    cache::{CacheStore, RedisCache},
    generation::EngineSettings,
    nutrition::NutritionValidator,
    usda::{NutritionDatabase, UsdaClient, UsdaConfig},
};

/// Staples of the meal plans, in the wording the generator uses.
const COMMON_FOODS: &[&str] = &[
    "chicken breast raw",
    "chicken breast cooked",
    "white rice cooked",
    "brown rice cooked",
    "sweet potato baked",
    "olive oil",
    "ground beef 90% lean raw",
    "ground beef 90% lean cooked",
    "salmon fillet raw",
    "eggs whole raw",
    "greek yogurt plain",
    "almonds raw",
];

#[derive(Parser)]
#[command(name = "warm-nutrition-cache", about = "Pre-fetch USDA nutrition facts into the cache")]
struct Args {
    /// Food to fetch (repeatable; the built-in list when omitted)
    #[arg(long = "food")]
    foods: Vec<String>,

    /// Cache lifetime of fetched entries, in days
    #[arg(long, default_value_t = 7)]
    ttl_days: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let api_key = std::env::var("USDA_API_KEY")
        .map_err(|_| anyhow::anyhow!("USDA_API_KEY environment variable not set"))?;
    let redis_client = redis::Client::open(env_or("REDIS_URL", "redis://127.0.0.1:6379"))?;
    let conn = redis_client.get_multiplexed_async_connection().await?;
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCache::new(conn, &env_or("APP_ENV", "development")));

    let usda: Arc<dyn NutritionDatabase> = Arc::new(UsdaClient::new(
        UsdaConfig {
            api_key,
            base_url: env_or("USDA_BASE_URL", "https://api.nal.usda.gov/fdc/v1"),
            timeout: Duration::from_secs(env_or("USDA_TIMEOUT_SECS", "5").parse()?),
            hourly_limit: env_or("USDA_HOURLY_LIMIT", "1000").parse()?,
        },
        cache.clone(),
    )?);

    let settings = EngineSettings {
        nutrition_cache_ttl_secs: args.ttl_days * 24 * 3600,
        lookup_concurrency: 1,
        ..EngineSettings::default()
    };
    let validator = NutritionValidator::new(Some(usda), cache, &settings);

    let foods: Vec<String> = if args.foods.is_empty() {
        COMMON_FOODS.iter().map(|f| f.to_string()).collect()
    } else {
        args.foods
    };

    tracing::info!("Warming nutrition cache with {} foods...", foods.len());
    let (resolved, failed) = validator.warm(&foods).await;
    for food in &failed {
        tracing::warn!("Could not cache: {}", food);
    }
    tracing::info!("Nutrition cache warm-up complete: {}/{} cached", resolved, foods.len());

    Ok(())
}
