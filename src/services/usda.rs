//! USDA FoodData Central client: the authoritative source for ingredient macros.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cache::CacheStore;
use super::rate_limit::{check_rate_limit, NUTRITION_DB_KEY};
use crate::models::nutrition::Macros;

const NUTRIENT_ENERGY_KCAL: u32 = 1008;
const NUTRIENT_ENERGY_ATWATER_GENERAL: u32 = 2047;
const NUTRIENT_ENERGY_ATWATER_SPECIFIC: u32 = 2048;
const NUTRIENT_PROTEIN: u32 = 1003;
const NUTRIENT_FAT: u32 = 1004;
const NUTRIENT_CARBOHYDRATE: u32 = 1005;

/// Whole-food data sets, preferred over branded products.
const PREFERRED_DATA_TYPES: &[&str] = &["Foundation", "SR Legacy"];
const MATCH_THRESHOLD: f64 = 0.3;
const PAGE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no match for '{0}'")]
    NotFound(String),
    #[error("nutrition database timed out")]
    Timeout,
    #[error("nutrition database rate limit reached")]
    RateLimited,
    #[error("nutrition database error: {0}")]
    Http(String),
}

impl LookupError {
    /// Failures that say something about the database rather than the food.
    pub fn is_outage(&self) -> bool {
        matches!(self, LookupError::Timeout | LookupError::Http(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            LookupError::NotFound(_) => "not_found",
            LookupError::Timeout => "timeout",
            LookupError::RateLimited => "rate_limited",
            LookupError::Http(_) => "http_error",
        }
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LookupError::Timeout
        } else {
            LookupError::Http(e.to_string())
        }
    }
}

/// Authoritative nutrition for one food, per 100 g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodFacts {
    pub reference_id: String,
    pub description: String,
    pub per_100g: Macros,
}

impl FoodFacts {
    pub fn for_grams(&self, grams: f64) -> Macros {
        self.per_100g.scaled(grams / 100.0)
    }
}

#[async_trait]
pub trait NutritionDatabase: Send + Sync {
    async fn search(&self, query: &str) -> Result<FoodFacts, LookupError>;
}

#[derive(Debug, Clone)]
pub struct UsdaConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub hourly_limit: u64,
}

pub struct UsdaClient {
    config: UsdaConfig,
    client: Client,
    quota: Arc<dyn CacheStore>,
}

impl UsdaClient {
    pub fn new(config: UsdaConfig, quota: Arc<dyn CacheStore>) -> Result<Self, LookupError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client, quota })
    }
}

#[async_trait]
impl NutritionDatabase for UsdaClient {
    async fn search(&self, query: &str) -> Result<FoodFacts, LookupError> {
        if query.trim().is_empty() {
            return Err(LookupError::NotFound(query.to_string()));
        }
        if !check_rate_limit(
            self.quota.as_ref(),
            NUTRITION_DB_KEY,
            self.config.hourly_limit,
            Duration::from_secs(3600),
        )
        .await
        {
            tracing::warn!("USDA hourly quota of {} reached", self.config.hourly_limit);
            return Err(LookupError::RateLimited);
        }

        let url = format!("{}/foods/search", self.config.base_url);
        let page_size = PAGE_SIZE.to_string();
        let data_types = PREFERRED_DATA_TYPES.join(",");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("pageSize", page_size.as_str()),
                ("dataType", data_types.as_str()),
                ("api_key", self.config.api_key.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(LookupError::RateLimited),
            status if !status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                return Err(LookupError::Http(format!("HTTP {status}: {text}")));
            }
            _ => {}
        }

        if let Some(remaining) = response.headers().get("X-RateLimit-Remaining") {
            tracing::debug!("USDA API calls remaining: {:?}", remaining);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Http(format!("JSON parse error: {e}")))?;

        let best = best_match(query, &body.foods)
            .ok_or_else(|| LookupError::NotFound(query.to_string()))?;
        facts_from(best).ok_or_else(|| LookupError::NotFound(query.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub foods: Vec<SearchFood>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchFood {
    pub fdc_id: u64,
    pub description: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub food_nutrients: Vec<SearchNutrient>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchNutrient {
    pub nutrient_id: u32,
    #[serde(default)]
    pub value: f64,
}

fn match_score(query: &str, description: &str) -> f64 {
    let query = query.to_lowercase();
    let food = description.to_lowercase();
    if query == food {
        return 1.0;
    }
    if food.contains(&query) {
        return 0.8;
    }
    let clean = |s: &str| -> Vec<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    };
    let query_words = clean(&query);
    let food_words = clean(&food);
    if query_words.is_empty() {
        return 0.0;
    }
    let matching = query_words.iter().filter(|w| food_words.contains(w)).count();
    if matching == query_words.len() {
        0.7
    } else {
        matching as f64 / query_words.len() as f64 * 0.6
    }
}

/// Highest-scoring result, boosting whole-food data sets. Falls back to the
/// first result when nothing clears the threshold.
pub(crate) fn best_match<'a>(query: &str, foods: &'a [SearchFood]) -> Option<&'a SearchFood> {
    let scored = foods.iter().map(|food| {
        let mut score = match_score(query, &food.description);
        if PREFERRED_DATA_TYPES.contains(&food.data_type.as_str()) {
            score *= 1.2;
        }
        (score, food)
    });
    let best = scored.max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    match best {
        Some((score, food)) if score >= MATCH_THRESHOLD => Some(food),
        _ => foods.first(),
    }
}

pub(crate) fn facts_from(food: &SearchFood) -> Option<FoodFacts> {
    let value = |id: u32| {
        food.food_nutrients
            .iter()
            .find(|n| n.nutrient_id == id)
            .map(|n| n.value)
    };
    let protein = value(NUTRIENT_PROTEIN);
    let fat = value(NUTRIENT_FAT);
    let carbs = value(NUTRIENT_CARBOHYDRATE);
    if protein.is_none() && fat.is_none() && carbs.is_none() {
        return None;
    }
    let mut macros = Macros::new(0.0, protein.unwrap_or(0.0), carbs.unwrap_or(0.0), fat.unwrap_or(0.0));
    macros.calories = value(NUTRIENT_ENERGY_KCAL)
        .or_else(|| value(NUTRIENT_ENERGY_ATWATER_SPECIFIC))
        .or_else(|| value(NUTRIENT_ENERGY_ATWATER_GENERAL))
        .unwrap_or_else(|| macros.macro_calories());
    Some(FoodFacts {
        reference_id: food.fdc_id.to_string(),
        description: food.description.clone(),
        per_100g: macros,
    })
}
