use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref GENERATIONS_COUNTER: CounterVec = register_counter_vec!(
        "mealplan_generations_total",
        "Meal plan generations by outcome and plan source",
        &["outcome", "source"]
    ).unwrap();

    pub static ref LOCK_CONTENTION_COUNTER: Counter = register_counter!(
        "mealplan_generation_lock_contention_total",
        "Generation requests rejected because one was already running for the user"
    ).unwrap();

    pub static ref NUTRITION_LOOKUPS_COUNTER: CounterVec = register_counter_vec!(
        "mealplan_nutrition_lookups_total",
        "Nutrition database lookups by result",
        &["result"]
    ).unwrap();

    pub static ref NUTRITION_CACHE_COUNTER: CounterVec = register_counter_vec!(
        "mealplan_nutrition_cache_total",
        "Nutrition cache reads by result (hit/miss)",
        &["result"]
    ).unwrap();

    pub static ref INGREDIENT_CORRECTIONS_COUNTER: Counter = register_counter!(
        "mealplan_ingredient_corrections_total",
        "Ingredients whose AI estimate was overwritten with database values"
    ).unwrap();

    pub static ref RECIPE_DEDUP_COUNTER: CounterVec = register_counter_vec!(
        "mealplan_recipe_saves_total",
        "Recipes saved, by whether an existing row was reused",
        &["result"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref STORED_RECIPES_GAUGE: Gauge = register_gauge!(
        "mealplan_stored_recipes",
        "Distinct stored recipes across all users"
    ).unwrap();

    pub static ref GENERATION_HISTORY_GAUGE: Gauge = register_gauge!(
        "mealplan_generation_history_rows",
        "Rows in the generation history"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let recipes: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM ai_generated_recipes")
        .fetch_one(pool)
        .await?;
    STORED_RECIPES_GAUGE.set(recipes as f64);

    let history: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM user_meal_generation_history")
            .fetch_one(pool)
            .await?;
    GENERATION_HISTORY_GAUGE.set(history as f64);

    info!("Metrics: {} recipes, {} generations", recipes, history);
    Ok(())
}
