use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::nutrition::{Macros, NutritionTarget};
use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
    #[serde(other)]
    Other,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
            MealType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngredientCategory {
    #[serde(alias = "proteins", alias = "meat", alias = "fish")]
    Protein,
    #[serde(alias = "carbs", alias = "carbohydrate", alias = "grain", alias = "grains")]
    Carb,
    #[serde(alias = "fats", alias = "oil", alias = "oils")]
    Fat,
    #[serde(alias = "vegetables", alias = "veg")]
    Vegetable,
    #[serde(alias = "fruits")]
    Fruit,
    Dairy,
    #[serde(other)]
    Other,
}

impl IngredientCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngredientCategory::Protein => "protein",
            IngredientCategory::Carb => "carb",
            IngredientCategory::Fat => "fat",
            IngredientCategory::Vegetable => "vegetable",
            IngredientCategory::Fruit => "fruit",
            IngredientCategory::Dairy => "dairy",
            IngredientCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: IngredientCategory,
    /// AI estimate until the validator overwrites it.
    #[serde(flatten)]
    pub nutrition: Macros,
    pub usda_reference_id: Option<String>,
    /// True only once the nutrition validator has corrected this ingredient.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    pub meal_type: MealType,
    pub calories: i32,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
    pub ingredients: Vec<Ingredient>,
    /// Preparation steps, in order.
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub prep_time_minutes: Option<u32>,
    #[serde(default)]
    pub cook_time_minutes: Option<u32>,
    #[serde(default)]
    pub tips: Vec<String>,
}

impl Meal {
    pub fn macros(&self) -> Macros {
        Macros::new(self.calories as f64, self.protein_g, self.carb_g, self.fat_g)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DayTotals {
    pub calories: i32,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub target: NutritionTarget,
    pub meals: Vec<Meal>,
    #[serde(default)]
    pub totals: DayTotals,
    /// Set when the day is still more than 5% off its calorie target after
    /// ingredient corrections.
    #[serde(default)]
    pub needs_regeneration: bool,
}

impl DayPlan {
    pub fn date(&self) -> NaiveDate {
        self.target.date
    }

    pub fn recompute_totals(&mut self) {
        let meals: Macros = self.meals.iter().map(Meal::macros).sum();
        self.totals = DayTotals {
            calories: self.meals.iter().map(|m| m.calories).sum(),
            protein_g: super::nutrition::round1(meals.protein_g),
            carb_g: super::nutrition::round1(meals.carb_g),
            fat_g: super::nutrition::round1(meals.fat_g),
        };
    }

    /// Fractional calorie deviation from the target.
    pub fn calorie_deviation(&self) -> f64 {
        if self.target.calories == 0 {
            return 0.0;
        }
        (self.totals.calories - self.target.calories).abs() as f64 / self.target.calories as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMealPlan {
    pub days: Vec<DayPlan>,
}

impl GeneratedMealPlan {
    pub fn meals(&self) -> impl Iterator<Item = &Meal> {
        self.days.iter().flat_map(|d| d.meals.iter())
    }

    pub fn recipe_names(&self) -> Vec<String> {
        self.meals().map(|m| m.name.clone()).collect()
    }

    /// Groceries for the whole plan, one line per food.
    pub fn shopping_list(&self) -> Vec<ShoppingItem> {
        crate::services::shopping::build_shopping_list(self)
    }
}

/// One line of a plan's shopping list. Quantities are totals in grams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: IngredientCategory,
    /// How many meals of the plan use it.
    pub meal_count: u32,
}

/// How the plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Provider,
    /// Produced by the schema-only re-prompt.
    StrictRetry,
    Template,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanSource::Provider => "provider",
            PlanSource::StrictRetry => "strict_retry",
            PlanSource::Template => "template",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanVerification {
    /// Every ingredient was found in the nutrition database.
    Verified,
    PartiallyUnverified,
    /// The nutrition database was unavailable or matched nothing.
    Unverified,
    /// Built from reference values, no lookups needed.
    Template,
}

/// A rule broken by a weekly plan. Returned, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    RecipeRepeated { name: String, count: usize },
    ConsecutiveProtein { protein: String, day: usize },
    TooFewProteinSources { found: usize },
    TooFewCarbSources { found: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    ValidationVarianceExceeded { date: NaiveDate, actual: i32, target: i32 },
    ExternalLookupFailure { ingredient: String, reason: String },
    Variety(Violation),
}

/// Plan after nutrition validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPlan {
    pub plan: GeneratedMealPlan,
    pub verification: PlanVerification,
    pub corrections: u32,
    pub warnings: Vec<PlanWarning>,
}

impl ValidatedPlan {
    pub fn needs_regeneration(&self) -> bool {
        self.plan.days.iter().any(|d| d.needs_regeneration)
    }
}

/// Lifecycle of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    Generating,
    Validating,
    Persisting,
    Completed,
    Failed(String),
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Completed | GenerationState::Failed(_))
    }

    pub fn can_transition_to(&self, next: &GenerationState) -> bool {
        use GenerationState::*;
        match (self, next) {
            (s, Failed(_)) => !s.is_terminal(),
            (Pending, Generating)
            | (Generating, Validating)
            | (Validating, Persisting)
            | (Persisting, Completed) => true,
            _ => false,
        }
    }
}

/// One user's request for a 1- or 7-day plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_id: Uuid,
    pub day_count: u8,
    pub dietary_requirements: BTreeSet<String>,
    pub budget: f64,
    pub targets: Vec<NutritionTarget>,
}

impl GenerationRequest {
    pub fn new(
        user_id: Uuid,
        dietary_requirements: impl IntoIterator<Item = String>,
        budget: f64,
        targets: Vec<NutritionTarget>,
    ) -> Result<Self, GenerationError> {
        let day_count = targets.len();
        if day_count != 1 && day_count != 7 {
            return Err(GenerationError::invalid_input(format!(
                "day_count must be 1 or 7, got {day_count}"
            )));
        }
        if !budget.is_finite() || budget < 0.0 {
            return Err(GenerationError::invalid_input("budget must be a non-negative amount"));
        }
        Ok(Self {
            user_id,
            day_count: day_count as u8,
            dietary_requirements: dietary_requirements
                .into_iter()
                .map(|r| r.trim().to_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
            budget: round_to_cents(budget),
            targets,
        })
    }

    pub fn is_weekly(&self) -> bool {
        self.day_count == 7
    }
}

/// Budgets are stored as NUMERIC(10, 2).
fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Body for POST /meal-plans/generate.
#[derive(Debug, Deserialize)]
pub struct GenerateMealPlanRequest {
    pub day_count: u8,
    /// First day of the plan; defaults to today.
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub dietary_requirements: Vec<String>,
    #[serde(default = "default_budget")]
    pub budget: f64,
}

fn default_budget() -> f64 {
    150.0
}
