use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use redis::Client as RedisClient;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mealplan_api::{
    config::Config,
    db,
    middleware::auth::JwtSecret,
    routes,
    services::{
        cache::{CacheStore, RedisCache},
        generation::GenerationOrchestrator,
        llm::{DisabledProvider, GenerativeProvider, OpenAiCompatibleProvider, ProviderConfig},
        metrics,
        recipes::PgRecipeStore,
        usda::{NutritionDatabase, UsdaClient, UsdaConfig},
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCache::new(redis_conn, &config.app_env));
    info!("Redis connected (key prefix '{}:')", config.app_env);

    let provider: Arc<dyn GenerativeProvider> = match &config.llm_api_key {
        Some(key) => {
            info!("Generative provider configured ({})", config.llm_model);
            Arc::new(OpenAiCompatibleProvider::new(ProviderConfig {
                api_key: key.clone(),
                base_url: config.llm_base_url.clone(),
                model: config.llm_model.clone(),
                timeout: Duration::from_secs(config.llm_timeout_secs),
                temperature: config.llm_temperature,
                max_tokens: config.llm_max_tokens,
            })?)
        }
        None => {
            info!("LLM_API_KEY not set, every plan will use the template");
            Arc::new(DisabledProvider)
        }
    };

    let nutrition_db: Option<Arc<dyn NutritionDatabase>> =
        match (&config.usda_api_key, config.usda_validation_enabled) {
            (Some(key), true) => {
                info!("USDA validation enabled ({} calls/hour)", config.usda_hourly_limit);
                Some(Arc::new(UsdaClient::new(
                    UsdaConfig {
                        api_key: key.clone(),
                        base_url: config.usda_base_url.clone(),
                        timeout: Duration::from_secs(config.usda_timeout_secs),
                        hourly_limit: config.usda_hourly_limit,
                    },
                    cache.clone(),
                )?))
            }
            _ => {
                info!("USDA validation disabled, plans will be returned unverified");
                None
            }
        };

    let orchestrator = GenerationOrchestrator::new(
        provider,
        nutrition_db,
        cache.clone(),
        Arc::new(PgRecipeStore::new(pool.clone())),
        config.engine_settings(),
    );

    metrics::start(pool.clone());

    let state = AppState {
        db: pool,
        cache,
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(AllowOrigin::any());

    let jwt_secret = JwtSecret(config.jwt_secret.clone());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Targets
        .route("/nutrition/targets", get(routes::targets::get_targets))
        // Meal plans
        .route("/meal-plans/generate", post(routes::meal_plans::generate))
        .route("/meal-plans/history", get(routes::meal_plans::history))
        .route("/recipes/{id}", get(routes::recipes::get_recipe))
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("mealplan API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
