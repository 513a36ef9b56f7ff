//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use mealplan_api::models::meal_plan::GenerationRequest;
use mealplan_api::models::nutrition::{Macros, NutritionTarget};
use mealplan_api::models::recipe::{
    GenerationHistoryRecord, NewGenerationHistory, NewPlanRecord, NewRecipe, RecipeDetail,
    SavedPlanRef, StoredIngredient, StoredRecipe,
};
use mealplan_api::services::llm::{GenerativeProvider, ProviderError};
use mealplan_api::services::prompt::GenerationPrompt;
use mealplan_api::services::recipes::{RecipeStore, StoreError};
use mealplan_api::services::usda::{FoodFacts, LookupError, NutritionDatabase};

// ── Generative provider ────────────────────────────────────────────────────

pub enum Reply {
    Text(String),
    Error(ProviderError),
    /// Never answers within any sane timeout.
    Hang,
}

/// Answers from a fixed script, recording every prompt it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    pub prompts: Mutex<Vec<GenerationPrompt>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, ProviderError> {
        self.prompts.lock().await.push(prompt.clone());
        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Error(e)) => Err(e),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout)
            }
            None => Err(ProviderError::Http("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ── Nutrition database ─────────────────────────────────────────────────────

/// Looks foods up in a fixed table keyed by query string.
#[derive(Default)]
pub struct ScriptedNutritionDb {
    foods: HashMap<String, FoodFacts>,
    failure: Option<fn() -> LookupError>,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl ScriptedNutritionDb {
    pub fn with_foods(foods: &[(&str, [f64; 4])]) -> Self {
        Self {
            foods: foods
                .iter()
                .enumerate()
                .map(|(i, (query, [cal, p, c, f]))| {
                    (
                        query.to_string(),
                        FoodFacts {
                            reference_id: format!("{}", 100_000 + i),
                            description: query.to_string(),
                            per_100g: Macros::new(*cal, *p, *c, *f),
                        },
                    )
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(failure: fn() -> LookupError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NutritionDatabase for ScriptedNutritionDb {
    async fn search(&self, query: &str) -> Result<FoodFacts, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        self.foods
            .get(query)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(query.to_string()))
    }
}

/// USDA reference values per 100 g used across the tests.
pub const CHICKEN_COOKED: [f64; 4] = [165.0, 31.0, 0.0, 3.6];
pub const RICE_COOKED: [f64; 4] = [130.0, 2.7, 28.0, 0.3];
pub const OLIVE_OIL: [f64; 4] = [884.0, 0.0, 0.0, 100.0];
pub const BROCCOLI: [f64; 4] = [35.0, 2.4, 7.2, 0.4];

pub fn reference_db() -> ScriptedNutritionDb {
    ScriptedNutritionDb::with_foods(&[
        ("chicken breast cooked", CHICKEN_COOKED),
        ("white rice cooked", RICE_COOKED),
        ("olive oil", OLIVE_OIL),
        ("broccoli steamed", BROCCOLI),
    ])
}

// ── Recipe store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflicts {
    None,
    /// The first n inserts lose a race: another writer stores the same
    /// signature just before.
    LoseRaces(u32),
    /// Every insert conflicts and nothing ever becomes visible.
    Always,
    /// Inserting the recipe with this name always conflicts.
    OnRecipe(&'static str),
}

#[derive(Debug, Clone)]
pub struct MemRecipe {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recipe: NewRecipe,
    pub times_generated: i32,
}

#[derive(Default)]
pub struct StoreState {
    pub recipes: Vec<MemRecipe>,
    pub history: Vec<(Uuid, NewGenerationHistory)>,
}

pub struct MemoryRecipeStore {
    pub state: Mutex<StoreState>,
    conflicts: Conflicts,
    pub insert_attempts: AtomicU32,
}

impl MemoryRecipeStore {
    pub fn new() -> Self {
        Self::with_conflicts(Conflicts::None)
    }

    pub fn with_conflicts(conflicts: Conflicts) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            conflicts,
            insert_attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RecipeStore for MemoryRecipeStore {
    /// Works on a copy of the rows and only swaps it in once the whole plan
    /// went through, like a rolled-back transaction on error.
    async fn save_plan(&self, record: &NewPlanRecord) -> Result<SavedPlanRef, StoreError> {
        let mut state = self.state.lock().await;
        let user_id = record.history.user_id;
        let mut rows = state.recipes.clone();
        let mut recipe_ids = Vec::new();
        let (mut inserted, mut reused) = (0, 0);

        for recipe in &record.recipes {
            if let Some(row) = rows
                .iter_mut()
                .find(|r| r.user_id == user_id && r.recipe.signature == recipe.signature)
            {
                row.times_generated += 1;
                recipe_ids.push(row.id);
                reused += 1;
                continue;
            }

            let attempt = self.insert_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let stored = MemRecipe {
                id: Uuid::new_v4(),
                user_id,
                recipe: recipe.clone(),
                times_generated: 1,
            };
            match self.conflicts {
                Conflicts::Always => return Err(StoreError::Conflict(recipe.signature.clone())),
                Conflicts::OnRecipe(name) if recipe.name == name => {
                    return Err(StoreError::Conflict(recipe.signature.clone()))
                }
                Conflicts::LoseRaces(n) if attempt <= n => {
                    // the other writer commits; our copy is thrown away
                    state.recipes.push(stored);
                    return Err(StoreError::Conflict(recipe.signature.clone()));
                }
                _ => {}
            }
            recipe_ids.push(stored.id);
            rows.push(stored);
            inserted += 1;
        }

        let history_id = Uuid::new_v4();
        let mut history = record.history.clone();
        history.recipe_ids = recipe_ids.clone();
        state.recipes = rows;
        state.history.push((history_id, history));
        Ok(SavedPlanRef {
            history_id,
            recipe_ids,
            inserted,
            reused,
        })
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationHistoryRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|(_, h)| h.user_id == user_id)
            .take(limit as usize)
            .map(|(id, h)| GenerationHistoryRecord {
                id: *id,
                user_id: h.user_id,
                generation_date: h.generation_date,
                recipe_ids: h.recipe_ids.clone(),
                dietary_requirements: h.dietary_requirements.clone(),
                day_count: h.day_count,
                plan_source: h.plan_source.clone(),
                shopping_list: Json(h.shopping_list.clone()),
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn recipe(&self, user_id: Uuid, recipe_id: Uuid) -> Result<Option<RecipeDetail>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .recipes
            .iter()
            .find(|r| r.id == recipe_id && r.user_id == user_id)
            .map(|r| RecipeDetail {
                recipe: StoredRecipe {
                    id: r.id,
                    user_id: r.user_id,
                    name: r.recipe.name.clone(),
                    normalized_name: r.recipe.normalized_name.clone(),
                    signature: r.recipe.signature.clone(),
                    meal_type: r.recipe.meal_type.clone(),
                    calories: r.recipe.calories,
                    protein_g: r.recipe.protein_g,
                    carb_g: r.recipe.carb_g,
                    fat_g: r.recipe.fat_g,
                    instructions: r.recipe.instructions.clone(),
                    prep_time_minutes: r.recipe.prep_time_minutes,
                    cook_time_minutes: r.recipe.cook_time_minutes,
                    tips: r.recipe.tips.clone(),
                    times_generated: r.times_generated,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
                ingredients: r
                    .recipe
                    .ingredients
                    .iter()
                    .enumerate()
                    .map(|(position, i)| StoredIngredient {
                        id: Uuid::new_v4(),
                        recipe_id: r.id,
                        position: position as i32,
                        name: i.name.clone(),
                        quantity: i.quantity,
                        unit: i.unit.clone(),
                        category: i.category.clone(),
                        calories: i.calories,
                        protein_g: i.protein_g,
                        carb_g: i.carb_g,
                        fat_g: i.fat_g,
                        usda_reference_id: i.usda_reference_id.clone(),
                        verified: i.verified,
                    })
                    .collect(),
            }))
    }
}

// ── Plans ──────────────────────────────────────────────────────────────────

pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

/// One provider-style ingredient: name, grams, category and the AI's estimate.
pub struct Item {
    pub name: &'static str,
    pub grams: f64,
    pub category: &'static str,
    pub estimate: [f64; 4],
}

pub fn item(name: &'static str, grams: f64, category: &'static str, estimate: [f64; 4]) -> Item {
    Item { name, grams, category, estimate }
}

/// Estimate an honest model would give: the reference value scaled to the portion.
pub fn honest(per_100g: [f64; 4], grams: f64) -> [f64; 4] {
    per_100g.map(|v| (v * grams / 100.0 * 10.0).round() / 10.0)
}

pub fn meal_json(name: &str, meal_type: &str, items: &[Item]) -> Value {
    let sum = |idx: usize| items.iter().map(|i| i.estimate[idx]).sum::<f64>();
    json!({
        "name": name,
        "meal_type": meal_type,
        "calories": sum(1) * 4.0 + sum(2) * 4.0 + sum(3) * 9.0,
        "protein_g": sum(1),
        "carb_g": sum(2),
        "fat_g": sum(3),
        "ingredients": items.iter().map(|i| json!({
            "name": i.name,
            "quantity": i.grams,
            "unit": "g",
            "category": i.category,
            "calories": i.estimate[0],
            "protein_g": i.estimate[1],
            "carb_g": i.estimate[2],
            "fat_g": i.estimate[3],
        })).collect::<Vec<_>>(),
    })
}

pub fn plan_json(days: Vec<Vec<Value>>) -> String {
    json!({ "days": days.into_iter().map(|meals| json!({ "meals": meals })).collect::<Vec<_>>() })
        .to_string()
}

/// A meal whose estimates match the reference values exactly.
pub fn honest_meal(name: &str, protein: &'static str, protein_grams: f64) -> Value {
    meal_json(
        name,
        "dinner",
        &[
            item(protein, protein_grams, "protein", honest(CHICKEN_COOKED, protein_grams)),
            item("white rice, cooked", 300.0, "carb", honest(RICE_COOKED, 300.0)),
            item("olive oil", 10.0, "fat", honest(OLIVE_OIL, 10.0)),
        ],
    )
}

/// Target whose calories equal the Atwater energy of the given meals.
pub fn target_for(date: NaiveDate, meals: &[Value]) -> NutritionTarget {
    let sum = |field: &str| meals.iter().map(|m| m[field].as_f64().unwrap()).sum::<f64>();
    let (p, c, f) = (sum("protein_g"), sum("carb_g"), sum("fat_g"));
    NutritionTarget {
        date,
        is_training_day: true,
        calories: (p * 4.0 + c * 4.0 + f * 9.0).round() as i32,
        protein_g: p.round() as i32,
        fat_g: f.round() as i32,
        carb_g: c.round() as i32,
    }
}

pub fn request(user_id: Uuid, targets: Vec<NutritionTarget>) -> GenerationRequest {
    GenerationRequest::new(user_id, Vec::<String>::new(), 150.0, targets).unwrap()
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
