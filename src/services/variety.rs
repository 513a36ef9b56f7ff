use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::{get_json, set_json, CacheError, CacheStore};
use super::normalize::{normalize_name, FoodKey};
use crate::models::meal_plan::{GeneratedMealPlan, IngredientCategory, Violation};

pub const MAX_RECIPE_REPEATS: usize = 2;
pub const MIN_DISTINCT_SOURCES: usize = 5;

/// Back-reference to a generated recipe; never the recipe itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarietyCacheEntry {
    pub recipe_name: String,
    pub generated_at: DateTime<Utc>,
}

pub fn variety_key(user_id: Uuid) -> String {
    format!("variety:{user_id}")
}

/// Recent recipe history per user, kept in the cache under `variety:{user_id}`.
///
/// Each user's list is one key written whole; the per-user generation lock
/// keeps writers for the same user serialized.
#[derive(Clone)]
pub struct VarietyTracker {
    cache: Arc<dyn CacheStore>,
    max_entries: usize,
    window: Duration,
}

impl VarietyTracker {
    pub fn new(cache: Arc<dyn CacheStore>, max_entries: usize, window: Duration) -> Self {
        Self {
            cache,
            max_entries,
            window,
        }
    }

    /// Up to `max_entries` recent recipe names, newest first, without duplicates.
    pub async fn get_exclusions(&self, user_id: Uuid) -> Result<Vec<String>, CacheError> {
        self.get_exclusions_at(user_id, Utc::now()).await
    }

    pub async fn get_exclusions_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, CacheError> {
        let entries = self.live_entries(user_id, now).await?;
        let mut seen = BTreeSet::new();
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| seen.insert(normalize_name(&e.recipe_name)))
            .map(|e| e.recipe_name)
            .take(self.max_entries)
            .collect())
    }

    pub async fn record(&self, user_id: Uuid, recipe_names: &[String]) -> Result<(), CacheError> {
        self.record_at(user_id, recipe_names, Utc::now()).await
    }

    /// Appends the names, keeps the newest `max_entries` and refreshes the TTL.
    pub async fn record_at(
        &self,
        user_id: Uuid,
        recipe_names: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut entries = self.live_entries(user_id, now).await?;
        entries.extend(recipe_names.iter().map(|name| VarietyCacheEntry {
            recipe_name: name.clone(),
            generated_at: now,
        }));
        if entries.len() > self.max_entries {
            entries.drain(..entries.len() - self.max_entries);
        }
        set_json(self.cache.as_ref(), &variety_key(user_id), &entries, self.window).await?;
        tracing::debug!(
            "Recorded {} recipes for user {} ({} in history)",
            recipe_names.len(),
            user_id,
            entries.len()
        );
        Ok(())
    }

    /// Stored entries still inside the window, oldest first.
    async fn live_entries(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<VarietyCacheEntry>, CacheError> {
        let entries: Vec<VarietyCacheEntry> = get_json(self.cache.as_ref(), &variety_key(user_id))
            .await?
            .unwrap_or_default();
        let window = chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::weeks(2));
        Ok(entries
            .into_iter()
            .filter(|e| now.signed_duration_since(e.generated_at) < window)
            .collect())
    }

    /// Variety rules for a plan. Repeats and consecutive proteins are checked
    /// for any plan; the distinct-source minimums only apply to a full week.
    pub fn validate_week(plan: &GeneratedMealPlan) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut counts: Vec<(String, String, usize)> = Vec::new();
        for meal in plan.meals() {
            let key = normalize_name(&meal.name);
            match counts.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, _, n)) => *n += 1,
                None => counts.push((key, meal.name.clone(), 1)),
            }
        }
        violations.extend(
            counts
                .into_iter()
                .filter(|(_, _, n)| *n > MAX_RECIPE_REPEATS)
                .map(|(_, name, count)| Violation::RecipeRepeated { name, count }),
        );

        let primaries: Vec<Option<String>> = plan
            .days
            .iter()
            .map(|day| primary_protein(day.meals.iter().flat_map(|m| m.ingredients.iter())))
            .collect();
        for (i, pair) in primaries.windows(2).enumerate() {
            if let [Some(a), Some(b)] = pair {
                if a == b {
                    violations.push(Violation::ConsecutiveProtein {
                        protein: b.clone(),
                        day: i + 2,
                    });
                }
            }
        }

        if plan.days.len() == 7 {
            let proteins = distinct_sources(plan, IngredientCategory::Protein);
            if proteins < MIN_DISTINCT_SOURCES {
                violations.push(Violation::TooFewProteinSources { found: proteins });
            }
            let carbs = distinct_sources(plan, IngredientCategory::Carb);
            if carbs < MIN_DISTINCT_SOURCES {
                violations.push(Violation::TooFewCarbSources { found: carbs });
            }
        }

        violations
    }
}

/// The protein-category food contributing the most protein grams; ties go to
/// the first one listed.
fn primary_protein<'a>(
    ingredients: impl Iterator<Item = &'a crate::models::meal_plan::Ingredient>,
) -> Option<String> {
    let mut grams: Vec<(String, f64)> = Vec::new();
    for ingredient in ingredients.filter(|i| i.category == IngredientCategory::Protein) {
        let base = FoodKey::parse(&ingredient.name).base;
        match grams.iter_mut().find(|(b, _)| *b == base) {
            Some((_, g)) => *g += ingredient.nutrition.protein_g,
            None => grams.push((base, ingredient.nutrition.protein_g)),
        }
    }
    let mut best: Option<(String, f64)> = None;
    for (base, g) in grams {
        if best.as_ref().map_or(true, |(_, top)| g > *top) {
            best = Some((base, g));
        }
    }
    best.map(|(base, _)| base)
}

fn distinct_sources(plan: &GeneratedMealPlan, category: IngredientCategory) -> usize {
    plan.meals()
        .flat_map(|m| m.ingredients.iter())
        .filter(|i| i.category == category)
        .map(|i| FoodKey::parse(&i.name).base)
        .collect::<BTreeSet<_>>()
        .len()
}
