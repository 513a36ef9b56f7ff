use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use super::metrics::RECIPE_DEDUP_COUNTER;
use super::normalize::normalize_name;
use crate::error::GenerationError;
use crate::models::meal_plan::{GenerationRequest, Meal, PlanSource, ValidatedPlan};
use crate::models::recipe::{
    GenerationHistoryRecord, NewGenerationHistory, NewIngredient, NewPlanRecord, NewRecipe,
    RecipeDetail, SavedPlanRef, StoredIngredient, StoredRecipe,
};

/// Attempts per plan before a signature race is reported.
pub const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer created this signature first.
    #[error("write conflict on signature {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stable identity of a recipe for one user: its normalized name plus
/// calories to the nearest 10 and whole grams of each macro.
pub fn recipe_signature(meal: &Meal) -> String {
    let calories = ((meal.calories as f64) / 10.0).round() as i64 * 10;
    let material = format!(
        "{}|{}|{}|{}|{}",
        normalize_name(&meal.name),
        calories,
        meal.protein_g.round() as i64,
        meal.carb_g.round() as i64,
        meal.fat_g.round() as i64
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Writes a whole plan atomically. Each recipe either bumps
    /// `times_generated` on the user's row with the same signature or is
    /// inserted; then one history row is appended. On any error nothing is
    /// kept. `Conflict` carries the signature another writer inserted first.
    async fn save_plan(&self, record: &NewPlanRecord) -> Result<SavedPlanRef, StoreError>;

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationHistoryRecord>, StoreError>;

    async fn recipe(&self, user_id: Uuid, recipe_id: Uuid) -> Result<Option<RecipeDetail>, StoreError>;
}

#[derive(Clone)]
pub struct RecipePersistence {
    store: Arc<dyn RecipeStore>,
}

impl RecipePersistence {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self { store }
    }

    /// Stores every meal of the plan (reusing known signatures), its shopping
    /// list and one generation history row. A lost insert race retries the
    /// whole plan, which then takes the dedup path for the raced recipe.
    pub async fn save(
        &self,
        validated: &ValidatedPlan,
        request: &GenerationRequest,
        source: PlanSource,
    ) -> Result<SavedPlanRef, GenerationError> {
        let record = NewPlanRecord {
            recipes: validated
                .plan
                .meals()
                .map(|meal| new_recipe(meal, &recipe_signature(meal)))
                .collect(),
            history: NewGenerationHistory {
                user_id: request.user_id,
                generation_date: Utc::now().date_naive(),
                recipe_ids: Vec::new(),
                dietary_requirements: request.dietary_requirements.iter().cloned().collect(),
                day_count: request.day_count as i16,
                budget: request.budget,
                plan_source: source.as_str().to_string(),
                shopping_list: validated.plan.shopping_list(),
            },
        };

        let mut conflicting = String::new();
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            match self.store.save_plan(&record).await {
                Ok(saved) => {
                    RECIPE_DEDUP_COUNTER
                        .with_label_values(&["inserted"])
                        .inc_by(saved.inserted as f64);
                    RECIPE_DEDUP_COUNTER
                        .with_label_values(&["reused"])
                        .inc_by(saved.reused as f64);
                    tracing::info!(
                        "Saved plan for user {}: {} new recipes, {} reused",
                        request.user_id,
                        saved.inserted,
                        saved.reused
                    );
                    return Ok(saved);
                }
                Err(StoreError::Conflict(signature)) => {
                    conflicting = record
                        .recipes
                        .iter()
                        .find(|r| r.signature == signature)
                        .map(|r| r.name.clone())
                        .unwrap_or(signature);
                    tracing::warn!(
                        "Conflict saving '{}' (attempt {}/{}), plan rolled back",
                        conflicting,
                        attempt,
                        MAX_SAVE_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GenerationError::PersistenceConflict(conflicting))
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GenerationHistoryRecord>, GenerationError> {
        Ok(self.store.history(user_id, limit.clamp(1, 100)).await?)
    }

    pub async fn recipe(&self, user_id: Uuid, recipe_id: Uuid) -> Result<Option<RecipeDetail>, GenerationError> {
        Ok(self.store.recipe(user_id, recipe_id).await?)
    }
}

fn new_recipe(meal: &Meal, signature: &str) -> NewRecipe {
    NewRecipe {
        name: meal.name.clone(),
        normalized_name: normalize_name(&meal.name),
        signature: signature.to_string(),
        meal_type: meal.meal_type.as_str().to_string(),
        calories: meal.calories,
        protein_g: meal.protein_g,
        carb_g: meal.carb_g,
        fat_g: meal.fat_g,
        ingredients: meal
            .ingredients
            .iter()
            .map(|i| NewIngredient {
                name: i.name.clone(),
                quantity: i.quantity,
                unit: i.unit.clone(),
                category: i.category.as_str().to_string(),
                calories: i.nutrition.calories,
                protein_g: i.nutrition.protein_g,
                carb_g: i.nutrition.carb_g,
                fat_g: i.nutrition.fat_g,
                usda_reference_id: i.usda_reference_id.clone(),
                verified: i.verified,
            })
            .collect(),
        instructions: meal.instructions.clone(),
        prep_time_minutes: meal.prep_time_minutes.map(|m| m as i32),
        cook_time_minutes: meal.cook_time_minutes.map(|m| m as i32),
        tips: meal.tips.clone(),
    }
}

// ── Postgres ───────────────────────────────────────────────────────────────

pub struct PgRecipeStore {
    pool: PgPool,
}

impl PgRecipeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(e: sqlx::Error, signature: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(signature.to_string()),
        _ => StoreError::Database(e),
    }
}

async fn bump_existing(
    conn: &mut PgConnection,
    user_id: Uuid,
    signature: &str,
) -> Result<Option<Uuid>, StoreError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"UPDATE ai_generated_recipes
           SET times_generated = times_generated + 1, updated_at = NOW()
           WHERE user_id = $1 AND signature = $2
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(signature)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

async fn insert_recipe(
    conn: &mut PgConnection,
    user_id: Uuid,
    recipe: &NewRecipe,
) -> Result<Uuid, StoreError> {
    let recipe_id = sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO ai_generated_recipes
               (user_id, name, normalized_name, signature, meal_type,
                calories, protein_g, carb_g, fat_g,
                instructions, prep_time_minutes, cook_time_minutes, tips)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(&recipe.name)
    .bind(&recipe.normalized_name)
    .bind(&recipe.signature)
    .bind(&recipe.meal_type)
    .bind(recipe.calories)
    .bind(recipe.protein_g)
    .bind(recipe.carb_g)
    .bind(recipe.fat_g)
    .bind(&recipe.instructions)
    .bind(recipe.prep_time_minutes)
    .bind(recipe.cook_time_minutes)
    .bind(&recipe.tips)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_insert_error(e, &recipe.signature))?;

    for (position, ing) in recipe.ingredients.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO recipe_ingredients
                   (recipe_id, position, name, quantity, unit, category,
                    calories, protein_g, carb_g, fat_g, usda_reference_id, verified)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(recipe_id)
        .bind(position as i32)
        .bind(&ing.name)
        .bind(ing.quantity)
        .bind(&ing.unit)
        .bind(&ing.category)
        .bind(ing.calories)
        .bind(ing.protein_g)
        .bind(ing.carb_g)
        .bind(ing.fat_g)
        .bind(&ing.usda_reference_id)
        .bind(ing.verified)
        .execute(&mut *conn)
        .await?;
    }
    Ok(recipe_id)
}

#[async_trait]
impl RecipeStore for PgRecipeStore {
    async fn save_plan(&self, record: &NewPlanRecord) -> Result<SavedPlanRef, StoreError> {
        let user_id = record.history.user_id;
        let mut tx = self.pool.begin().await?;

        let mut recipe_ids = Vec::with_capacity(record.recipes.len());
        let (mut inserted, mut reused) = (0, 0);
        for recipe in &record.recipes {
            let id = match bump_existing(&mut tx, user_id, &recipe.signature).await? {
                Some(id) => {
                    reused += 1;
                    id
                }
                None => {
                    inserted += 1;
                    insert_recipe(&mut tx, user_id, recipe).await?
                }
            };
            recipe_ids.push(id);
        }

        let history = &record.history;
        let history_id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO user_meal_generation_history
                   (user_id, generation_date, recipe_ids, dietary_requirements,
                    day_count, budget, plan_source, shopping_list)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(history.generation_date)
        .bind(&recipe_ids)
        .bind(&history.dietary_requirements)
        .bind(history.day_count)
        .bind(history.budget)
        .bind(&history.plan_source)
        .bind(Json(&history.shopping_list))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SavedPlanRef {
            history_id,
            recipe_ids,
            inserted,
            reused,
        })
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationHistoryRecord>, StoreError> {
        let rows = sqlx::query_as::<_, GenerationHistoryRecord>(
            r#"SELECT id, user_id, generation_date, recipe_ids, dietary_requirements,
                      day_count, plan_source, shopping_list, created_at
               FROM user_meal_generation_history
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn recipe(&self, user_id: Uuid, recipe_id: Uuid) -> Result<Option<RecipeDetail>, StoreError> {
        let recipe = sqlx::query_as::<_, StoredRecipe>(
            r#"SELECT id, user_id, name, normalized_name, signature, meal_type,
                      calories, protein_g, carb_g, fat_g,
                      instructions, prep_time_minutes, cook_time_minutes, tips,
                      times_generated, created_at, updated_at
               FROM ai_generated_recipes
               WHERE id = $1 AND user_id = $2"#,
        )
        .bind(recipe_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(recipe) = recipe else {
            return Ok(None);
        };

        let ingredients = sqlx::query_as::<_, StoredIngredient>(
            r#"SELECT id, recipe_id, position, name, quantity, unit, category,
                      calories, protein_g, carb_g, fat_g, usda_reference_id, verified
               FROM recipe_ingredients
               WHERE recipe_id = $1
               ORDER BY position"#,
        )
        .bind(recipe.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(RecipeDetail { recipe, ingredients }))
    }
}
