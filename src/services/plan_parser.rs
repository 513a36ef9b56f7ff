//! Strict parsing of the provider's answer into a [`GeneratedMealPlan`].
//!
//! Nothing from the answer is trusted until it has passed the checks below;
//! a single bad field rejects the whole plan.

use serde::Deserialize;
use thiserror::Error;

use crate::models::meal_plan::{
    DayPlan, DayTotals, GeneratedMealPlan, Ingredient, IngredientCategory, Meal, MealType,
};
use crate::models::nutrition::{round1, Macros, NutritionTarget};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema violation: {0}")]
    Schema(String),
}

fn schema(msg: impl Into<String>) -> ParseError {
    ParseError::Schema(msg.into())
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    days: Vec<WireDay>,
}

#[derive(Debug, Deserialize)]
struct WireDay {
    meals: Vec<WireMeal>,
}

#[derive(Debug, Deserialize)]
struct WireMeal {
    name: String,
    meal_type: Option<MealType>,
    calories: f64,
    protein_g: f64,
    #[serde(alias = "carbs_g")]
    carb_g: f64,
    #[serde(alias = "fats_g")]
    fat_g: f64,
    ingredients: Vec<WireIngredient>,
    #[serde(default)]
    instructions: Option<WireText>,
    #[serde(default, alias = "prep_time")]
    prep_time_minutes: Option<f64>,
    #[serde(default, alias = "cook_time")]
    cook_time_minutes: Option<f64>,
    #[serde(default, alias = "meal_prep_tips", alias = "prep_tips")]
    tips: Option<WireText>,
}

/// Free text the provider sends either as one string or as a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireText {
    One(String),
    Many(Vec<String>),
}

impl WireText {
    fn into_lines(self) -> Vec<String> {
        let lines = match self {
            WireText::One(text) => text.lines().map(str::to_string).collect(),
            WireText::Many(lines) => lines,
        };
        lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct WireIngredient {
    name: String,
    #[serde(alias = "amount")]
    quantity: f64,
    unit: String,
    category: Option<IngredientCategory>,
    calories: f64,
    protein_g: f64,
    #[serde(alias = "carbs_g")]
    carb_g: f64,
    #[serde(alias = "fats_g")]
    fat_g: f64,
}

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parses the answer and attaches day `i` to `targets[i]`.
pub fn parse_plan(raw: &str, targets: &[NutritionTarget]) -> Result<GeneratedMealPlan, ParseError> {
    let wire: WirePlan = serde_json::from_str(strip_code_fences(raw))?;

    if wire.days.len() != targets.len() {
        return Err(schema(format!(
            "expected {} days, got {}",
            targets.len(),
            wire.days.len()
        )));
    }

    let days = wire
        .days
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(day_idx, (day, target))| convert_day(day_idx, day, *target))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GeneratedMealPlan { days })
}

fn convert_day(day_idx: usize, day: WireDay, target: NutritionTarget) -> Result<DayPlan, ParseError> {
    if day.meals.is_empty() {
        return Err(schema(format!("day {} has no meals", day_idx + 1)));
    }
    let meals = day
        .meals
        .into_iter()
        .enumerate()
        .map(|(meal_idx, meal)| convert_meal(day_idx, meal_idx, meal))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plan = DayPlan {
        target,
        meals,
        totals: DayTotals::default(),
        needs_regeneration: false,
    };
    plan.recompute_totals();
    Ok(plan)
}

fn convert_meal(day_idx: usize, meal_idx: usize, meal: WireMeal) -> Result<Meal, ParseError> {
    let at = || format!("day {} meal {}", day_idx + 1, meal_idx + 1);
    let name = meal.name.trim().to_string();
    if name.is_empty() {
        return Err(schema(format!("{}: empty name", at())));
    }
    let macros = Macros::new(meal.calories, meal.protein_g, meal.carb_g, meal.fat_g);
    if !macros.is_finite_non_negative() {
        return Err(schema(format!("{}: macros must be non-negative numbers", at())));
    }
    if meal.ingredients.is_empty() {
        return Err(schema(format!("{}: no ingredients", at())));
    }
    let ingredients = meal
        .ingredients
        .into_iter()
        .map(|i| convert_ingredient(&at(), i))
        .collect::<Result<Vec<_>, _>>()?;
    let prep_time_minutes = minutes(&at(), "prep time", meal.prep_time_minutes)?;
    let cook_time_minutes = minutes(&at(), "cook time", meal.cook_time_minutes)?;

    Ok(Meal {
        name,
        meal_type: meal.meal_type.unwrap_or_else(|| default_meal_type(meal_idx)),
        calories: macros.calories.round() as i32,
        protein_g: round1(macros.protein_g),
        carb_g: round1(macros.carb_g),
        fat_g: round1(macros.fat_g),
        ingredients,
        instructions: meal.instructions.map(WireText::into_lines).unwrap_or_default(),
        prep_time_minutes,
        cook_time_minutes,
        tips: meal.tips.map(WireText::into_lines).unwrap_or_default(),
    })
}

fn minutes(at: &str, what: &str, value: Option<f64>) -> Result<Option<u32>, ParseError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_finite() && (0.0..=24.0 * 60.0).contains(&v) => Ok(Some(v.round() as u32)),
        Some(v) => Err(schema(format!("{at}: {what} of {v} minutes is out of range"))),
    }
}

fn convert_ingredient(at: &str, ingredient: WireIngredient) -> Result<Ingredient, ParseError> {
    let name = ingredient.name.trim().to_string();
    if name.is_empty() {
        return Err(schema(format!("{at}: ingredient with empty name")));
    }
    if !ingredient.quantity.is_finite() || ingredient.quantity <= 0.0 {
        return Err(schema(format!("{at}: '{name}' needs a positive quantity")));
    }
    let nutrition = Macros::new(
        ingredient.calories,
        ingredient.protein_g,
        ingredient.carb_g,
        ingredient.fat_g,
    );
    if !nutrition.is_finite_non_negative() {
        return Err(schema(format!("{at}: '{name}' has invalid macros")));
    }
    Ok(Ingredient {
        name,
        quantity: ingredient.quantity,
        unit: ingredient.unit.trim().to_string(),
        category: ingredient.category.unwrap_or(IngredientCategory::Other),
        nutrition,
        usda_reference_id: None,
        verified: false,
    })
}

fn default_meal_type(meal_idx: usize) -> MealType {
    match meal_idx {
        0 => MealType::Lunch,
        1 => MealType::Snack,
        2 => MealType::Dinner,
        _ => MealType::Other,
    }
}
