//! Cross-checks AI ingredient estimates against the nutrition database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};

use super::cache::{get_json, set_json, CacheStore};
use super::generation::EngineSettings;
use super::metrics::{
    INGREDIENT_CORRECTIONS_COUNTER, NUTRITION_CACHE_COUNTER, NUTRITION_LOOKUPS_COUNTER,
};
use super::normalize::FoodKey;
use super::retry::RetryPolicy;
use super::units::to_grams;
use super::usda::{FoodFacts, LookupError, NutritionDatabase};
use crate::error::GenerationError;
use crate::models::meal_plan::{
    GeneratedMealPlan, Meal, PlanVerification, PlanWarning, ValidatedPlan,
};
use crate::models::nutrition::{round1, Macros};

/// Fractional calorie difference between an estimate and the database value.
///
/// A database value of zero makes any non-zero estimate infinitely wrong.
pub fn calorie_variance(estimated: f64, verified: f64) -> f64 {
    if verified == 0.0 {
        if estimated == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (estimated - verified).abs() / verified
    }
}

#[derive(Debug)]
enum Lookup {
    Found(FoodFacts),
    /// Always `GenerationError::ExternalLookupFailure`.
    Failed(GenerationError),
    /// Not attempted: the database was already considered down.
    Skipped,
}

pub struct NutritionValidator {
    database: Option<Arc<dyn NutritionDatabase>>,
    cache: Arc<dyn CacheStore>,
    variance_tolerance: f64,
    day_tolerance: f64,
    lookup_timeout: Duration,
    cache_ttl: Duration,
    concurrency: usize,
    outage_threshold: u32,
    retry: RetryPolicy<LookupError>,
}

impl NutritionValidator {
    /// `database: None` disables lookups; plans then come back unverified.
    pub fn new(
        database: Option<Arc<dyn NutritionDatabase>>,
        cache: Arc<dyn CacheStore>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            database,
            cache,
            variance_tolerance: settings.variance_tolerance,
            day_tolerance: settings.day_tolerance,
            lookup_timeout: settings.lookup_timeout,
            cache_ttl: Duration::from_secs(settings.nutrition_cache_ttl_secs),
            concurrency: settings.lookup_concurrency.max(1),
            outage_threshold: settings.outage_threshold,
            retry: RetryPolicy::lookup(),
        }
    }

    /// Corrects ingredients that drift more than the tolerance from the
    /// database, recomputes meal and day totals and flags days that remain
    /// out of tolerance. Lookup failures only lower the verification status.
    pub async fn validate(&self, mut plan: GeneratedMealPlan) -> ValidatedPlan {
        let mut warnings = Vec::new();

        let mut keys: Vec<(String, FoodKey)> = Vec::new();
        let mut unsearchable: Vec<String> = Vec::new();
        for ingredient in plan.meals().flat_map(|m| m.ingredients.iter()) {
            let key = FoodKey::parse(&ingredient.name);
            if key.base.is_empty() {
                if !unsearchable.contains(&ingredient.name) {
                    unsearchable.push(ingredient.name.clone());
                }
            } else if !keys.iter().any(|(_, k)| *k == key) {
                keys.push((ingredient.name.clone(), key));
            }
        }
        for name in &unsearchable {
            warnings.push(PlanWarning::ExternalLookupFailure {
                ingredient: name.clone(),
                reason: "no searchable food name".to_string(),
            });
        }
        let foods = keys.len() + unsearchable.len();

        let lookups = self.resolve_all(&keys).await;
        let mut found = 0usize;
        let mut facts: HashMap<String, FoodFacts> = HashMap::new();
        for ((name, key), lookup) in keys.iter().zip(lookups) {
            match lookup {
                Lookup::Found(f) => {
                    found += 1;
                    facts.insert(key.cache_key(), f);
                }
                Lookup::Failed(failure) => warnings.push(PlanWarning::ExternalLookupFailure {
                    ingredient: name.clone(),
                    reason: failure.to_string(),
                }),
                Lookup::Skipped => warnings.push(PlanWarning::ExternalLookupFailure {
                    ingredient: name.clone(),
                    reason: "nutrition database unavailable".to_string(),
                }),
            }
        }

        let mut corrections = 0u32;
        for day in &mut plan.days {
            for meal in &mut day.meals {
                corrections += self.correct_meal(meal, &facts);
            }
            day.recompute_totals();
            let deviation = day.calorie_deviation();
            if deviation > self.day_tolerance {
                day.needs_regeneration = true;
                tracing::warn!(
                    "Day {} is {:.1}% off target ({} vs {} kcal) after correction",
                    day.date(),
                    deviation * 100.0,
                    day.totals.calories,
                    day.target.calories
                );
                warnings.push(PlanWarning::ValidationVarianceExceeded {
                    date: day.date(),
                    actual: day.totals.calories,
                    target: day.target.calories,
                });
            }
        }

        let verification = if self.database.is_none() || found == 0 {
            PlanVerification::Unverified
        } else if found == foods {
            PlanVerification::Verified
        } else {
            PlanVerification::PartiallyUnverified
        };
        tracing::info!(
            "Validated plan: {}/{} foods found, {} corrections, {:?}",
            found,
            foods,
            corrections,
            verification
        );

        ValidatedPlan {
            plan,
            verification,
            corrections,
            warnings,
        }
    }

    /// Loads foods into the nutrition cache. Returns how many resolved and
    /// the names that did not.
    pub async fn warm(&self, names: &[String]) -> (usize, Vec<String>) {
        let keys: Vec<(String, FoodKey)> = names
            .iter()
            .map(|n| (n.clone(), FoodKey::parse(n)))
            .filter(|(_, k)| !k.base.is_empty())
            .collect();
        let mut resolved = 0;
        let mut failed = Vec::new();
        for ((name, _), lookup) in keys.iter().zip(self.resolve_all(&keys).await) {
            match lookup {
                Lookup::Found(_) => resolved += 1,
                _ => failed.push(name.clone()),
            }
        }
        (resolved, failed)
    }

    /// Overwrites drifting ingredients, then derives the meal's macros from
    /// its ingredients and its calories from those macros.
    fn correct_meal(&self, meal: &mut Meal, facts: &HashMap<String, FoodFacts>) -> u32 {
        let mut corrections = 0;
        for ingredient in &mut meal.ingredients {
            let key = FoodKey::parse(&ingredient.name);
            let Some(f) = facts.get(&key.cache_key()) else {
                ingredient.verified = false;
                continue;
            };
            let reference = f.for_grams(to_grams(ingredient.quantity, &ingredient.unit));
            let variance = calorie_variance(ingredient.nutrition.calories, reference.calories);
            ingredient.usda_reference_id = Some(f.reference_id.clone());
            if variance > self.variance_tolerance {
                tracing::info!(
                    "Corrected '{}': {:.0} -> {:.0} kcal ({:.0}% off)",
                    ingredient.name,
                    ingredient.nutrition.calories,
                    reference.calories,
                    variance.min(99.99) * 100.0
                );
                ingredient.nutrition = reference.rounded();
                ingredient.verified = true;
                corrections += 1;
                INGREDIENT_CORRECTIONS_COUNTER.inc();
            } else {
                ingredient.verified = false;
            }
        }

        let total: Macros = meal.ingredients.iter().map(|i| i.nutrition).sum();
        meal.protein_g = round1(total.protein_g);
        meal.carb_g = round1(total.carb_g);
        meal.fat_g = round1(total.fat_g);
        meal.calories = Macros::new(0.0, meal.protein_g, meal.carb_g, meal.fat_g)
            .macro_calories()
            .round() as i32;
        corrections
    }

    async fn resolve_all(&self, keys: &[(String, FoodKey)]) -> Vec<Lookup> {
        let consecutive_failures = AtomicU32::new(0);
        let lookups: Vec<_> = keys
            .iter()
            .map(|(_, key)| self.resolve(key, &consecutive_failures))
            .collect();
        stream::iter(lookups)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Cache first, then the database.
    async fn resolve(&self, key: &FoodKey, consecutive_failures: &AtomicU32) -> Lookup {
        let cache_key = key.cache_key();
        match get_json::<FoodFacts>(self.cache.as_ref(), &cache_key).await {
            Ok(Some(facts)) => {
                NUTRITION_CACHE_COUNTER.with_label_values(&["hit"]).inc();
                return Lookup::Found(facts);
            }
            Ok(None) => NUTRITION_CACHE_COUNTER.with_label_values(&["miss"]).inc(),
            Err(e) => tracing::warn!("nutrition cache read failed for {cache_key}: {e}"),
        }

        let Some(database) = &self.database else {
            return Lookup::Skipped;
        };
        if consecutive_failures.load(Ordering::SeqCst) >= self.outage_threshold {
            return Lookup::Skipped;
        }

        let query = key.query();
        let query_ref = query.as_str();
        let timeout = self.lookup_timeout;
        let result = self
            .retry
            .run(|_| async move {
                match tokio::time::timeout(timeout, database.search(query_ref)).await {
                    Ok(result) => result,
                    Err(_) => Err(LookupError::Timeout),
                }
            })
            .await;

        match result {
            Ok(facts) => {
                consecutive_failures.store(0, Ordering::SeqCst);
                NUTRITION_LOOKUPS_COUNTER.with_label_values(&["found"]).inc();
                if let Err(e) =
                    set_json(self.cache.as_ref(), &cache_key, &facts, self.cache_ttl).await
                {
                    tracing::warn!("nutrition cache write failed for {cache_key}: {e}");
                }
                Lookup::Found(facts)
            }
            Err(e) => {
                if e.is_outage() {
                    consecutive_failures.fetch_add(1, Ordering::SeqCst);
                } else {
                    consecutive_failures.store(0, Ordering::SeqCst);
                }
                NUTRITION_LOOKUPS_COUNTER.with_label_values(&[e.label()]).inc();
                let failure = GenerationError::ExternalLookupFailure {
                    ingredient: query,
                    source: e,
                };
                tracing::warn!("{failure}");
                Lookup::Failed(failure)
            }
        }
    }
}
