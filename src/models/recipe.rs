use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::meal_plan::ShoppingItem;

/// A generated recipe, deduplicated per user by its signature.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredRecipe {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub normalized_name: String,
    pub signature: String,
    pub meal_type: String,
    pub calories: i32,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
    pub instructions: Vec<String>,
    pub prep_time_minutes: Option<i32>,
    pub cook_time_minutes: Option<i32>,
    pub tips: Vec<String>,
    pub times_generated: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredIngredient {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub position: i32,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: String,
    pub calories: f64,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
    pub usda_reference_id: Option<String>,
    pub verified: bool,
}

/// Audit row written once per successful generation. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationHistoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub generation_date: NaiveDate,
    pub recipe_ids: Vec<Uuid>,
    pub dietary_requirements: Vec<String>,
    pub day_count: i16,
    pub plan_source: String,
    pub shopping_list: Json<Vec<ShoppingItem>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a recipe that has no stored match yet.
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub name: String,
    pub normalized_name: String,
    pub signature: String,
    pub meal_type: String,
    pub calories: i32,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
    pub ingredients: Vec<NewIngredient>,
    pub instructions: Vec<String>,
    pub prep_time_minutes: Option<i32>,
    pub cook_time_minutes: Option<i32>,
    pub tips: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewIngredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: String,
    pub calories: f64,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
    pub usda_reference_id: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct NewGenerationHistory {
    pub user_id: Uuid,
    pub generation_date: NaiveDate,
    /// Left empty by callers of `RecipeStore::save_plan`; the store fills it
    /// as recipes resolve.
    pub recipe_ids: Vec<Uuid>,
    pub dietary_requirements: Vec<String>,
    pub day_count: i16,
    /// Whole cents.
    pub budget: f64,
    pub plan_source: String,
    pub shopping_list: Vec<ShoppingItem>,
}

/// Everything one generation writes. Stores apply it all-or-nothing.
#[derive(Debug, Clone)]
pub struct NewPlanRecord {
    /// One per meal, in plan order.
    pub recipes: Vec<NewRecipe>,
    pub history: NewGenerationHistory,
}

/// What `RecipePersistence::save` wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPlanRef {
    pub history_id: Uuid,
    /// One id per meal, in plan order (repeated meals share an id).
    pub recipe_ids: Vec<Uuid>,
    pub inserted: usize,
    pub reused: usize,
}

/// Recipe with its ingredients, for GET /recipes/{id}.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: StoredRecipe,
    pub ingredients: Vec<StoredIngredient>,
}

/// Query params for GET /meal-plans/history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}
