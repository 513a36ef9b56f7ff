//! Deterministic fallback plan built from reference foods.

use chrono::Datelike;

use super::prompt::MEAL_SCHEDULE;
use crate::models::meal_plan::{
    DayPlan, DayTotals, GeneratedMealPlan, GenerationRequest, Ingredient, IngredientCategory, Meal,
    MealType,
};
use crate::models::nutrition::{Macros, NutritionTarget};

/// A reference food with its nutrition per 100 g.
#[derive(Debug, Clone, Copy)]
struct Food {
    label: &'static str,
    name: &'static str,
    per_100g: [f64; 4],
}

impl Food {
    const fn new(label: &'static str, name: &'static str, per_100g: [f64; 4]) -> Self {
        Self { label, name, per_100g }
    }

    fn macros(&self) -> Macros {
        let [calories, protein, carbs, fat] = self.per_100g;
        Macros::new(calories, protein, carbs, fat)
    }
}

const OMNIVORE_PROTEINS: [Food; 7] = [
    Food::new("Grilled Chicken", "chicken breast, grilled", [165.0, 31.0, 0.0, 3.6]),
    Food::new("Baked Salmon", "salmon fillet, baked", [206.0, 22.0, 0.0, 12.4]),
    Food::new("Lean Beef", "ground beef 90% lean, cooked", [217.0, 26.0, 0.0, 12.0]),
    Food::new("Roast Turkey", "turkey breast, roasted", [135.0, 30.0, 0.0, 1.0]),
    Food::new("Baked Cod", "cod fillet, baked", [105.0, 23.0, 0.0, 0.9]),
    Food::new("Pork Tenderloin", "pork tenderloin, roasted", [143.0, 26.0, 0.0, 3.5]),
    Food::new("Garlic Shrimp", "shrimp, cooked", [99.0, 24.0, 0.2, 0.3]),
];

const VEGETARIAN_PROTEINS: [Food; 7] = [
    Food::new("Scrambled Eggs", "eggs, whole, scrambled", [149.0, 10.0, 1.6, 11.0]),
    Food::new("Greek Yogurt", "greek yogurt, plain, nonfat", [59.0, 10.0, 3.6, 0.4]),
    Food::new("Cottage Cheese", "cottage cheese, low fat", [72.0, 12.0, 2.7, 1.0]),
    Food::new("Crispy Tofu", "tofu, firm, baked", [144.0, 17.0, 3.0, 9.0]),
    Food::new("Tempeh", "tempeh, cooked", [196.0, 20.0, 9.0, 11.0]),
    Food::new("Edamame", "edamame, boiled", [121.0, 12.0, 9.0, 5.0]),
    Food::new("Lentil Stew", "lentils, boiled", [116.0, 9.0, 20.0, 0.4]),
];

const VEGAN_PROTEINS: [Food; 7] = [
    Food::new("Crispy Tofu", "tofu, firm, baked", [144.0, 17.0, 3.0, 9.0]),
    Food::new("Tempeh", "tempeh, cooked", [196.0, 20.0, 9.0, 11.0]),
    Food::new("Soy Mince", "textured vegetable protein, dry", [327.0, 51.5, 33.3, 1.2]),
    Food::new("Lentil Stew", "lentils, boiled", [116.0, 9.0, 20.0, 0.4]),
    Food::new("Roasted Chickpeas", "chickpeas, boiled", [164.0, 8.9, 27.0, 2.6]),
    Food::new("Edamame", "edamame, boiled", [121.0, 12.0, 9.0, 5.0]),
    Food::new("Black Bean Chili", "black beans, boiled", [132.0, 8.9, 24.0, 0.5]),
];

const CARBS: [Food; 7] = [
    Food::new("White Rice", "white rice, cooked", [130.0, 2.7, 28.0, 0.3]),
    Food::new("Sweet Potato", "sweet potato, baked", [90.0, 2.0, 21.0, 0.1]),
    Food::new("Quinoa", "quinoa, cooked", [120.0, 4.4, 21.0, 1.9]),
    Food::new("Brown Rice", "brown rice, cooked", [123.0, 2.7, 26.0, 1.0]),
    Food::new("Baked Potato", "potato, baked", [93.0, 2.5, 21.0, 0.1]),
    Food::new("Whole Wheat Pasta", "whole wheat pasta, cooked", [149.0, 5.8, 30.0, 1.7]),
    Food::new("Oats", "oats, rolled, dry", [389.0, 16.9, 66.0, 6.9]),
];

const GLUTEN_FREE_PASTA: Food =
    Food::new("Buckwheat", "buckwheat groats, cooked", [92.0, 3.4, 20.0, 0.6]);
const VEGETABLE: Food = Food::new("Broccoli", "broccoli, steamed", [35.0, 2.4, 7.2, 0.4]);
const OIL: Food = Food::new("Olive Oil", "olive oil", [884.0, 0.0, 0.0, 100.0]);
const VEGETABLE_GRAMS: f64 = 85.0;
const TEMPLATE_PREP_MINUTES: u32 = 10;
const TEMPLATE_COOK_MINUTES: u32 = 25;

/// Share of each daily macro per meal, in percent. The last meal takes the remainder.
const MEAL_SHARES: [u32; 3] = [MEAL_SCHEDULE[0].2, MEAL_SCHEDULE[1].2, MEAL_SCHEDULE[2].2];
const MEAL_TYPES: [MealType; 3] = [MealType::Lunch, MealType::Snack, MealType::Dinner];

pub struct TemplatePlanner;

impl TemplatePlanner {
    /// One protein per day, rotated by date so consecutive days never share it;
    /// each meal pairs it with a different carb, so no name repeats in a week.
    /// Day totals equal the targets exactly.
    pub fn build(request: &GenerationRequest) -> GeneratedMealPlan {
        let proteins = protein_pool(request);
        let carbs = carb_pool(request);
        let days = request
            .targets
            .iter()
            .map(|target| {
                let offset = target.date.num_days_from_ce().rem_euclid(7) as usize;
                template_day(*target, &proteins[offset], &carbs, offset)
            })
            .collect();
        GeneratedMealPlan { days }
    }
}

fn has(request: &GenerationRequest, requirement: &str) -> bool {
    request
        .dietary_requirements
        .iter()
        .any(|r| r.replace(['-', '_'], " ") == requirement)
}

fn protein_pool(request: &GenerationRequest) -> [Food; 7] {
    if has(request, "vegan") {
        VEGAN_PROTEINS
    } else if has(request, "vegetarian") {
        VEGETARIAN_PROTEINS
    } else {
        OMNIVORE_PROTEINS
    }
}

fn carb_pool(request: &GenerationRequest) -> [Food; 7] {
    let mut carbs = CARBS;
    if has(request, "gluten free") {
        carbs[5] = GLUTEN_FREE_PASTA;
    }
    carbs
}

fn template_steps(protein: &Food, carb: &Food) -> Vec<String> {
    let (protein_label, carb_label) = (protein.label.to_lowercase(), carb.label.to_lowercase());
    vec![
        format!("Weigh out the {} and the {}.", protein.name, carb.name),
        format!("Cook the {protein_label} and the {carb_label} until done."),
        format!(
            "Steam the {} and dress everything with the {}.",
            VEGETABLE.label.to_lowercase(),
            OIL.label.to_lowercase()
        ),
    ]
}

/// Splits a daily integer amount 30/35/35 so the parts sum back exactly.
fn split(total: i32) -> [i32; 3] {
    let first = (total as f64 * MEAL_SHARES[0] as f64 / 100.0).round() as i32;
    let second = (total as f64 * MEAL_SHARES[1] as f64 / 100.0).round() as i32;
    [first, second, total - first - second]
}

fn template_day(target: NutritionTarget, protein: &Food, carbs: &[Food; 7], offset: usize) -> DayPlan {
    let protein_split = split(target.protein_g);
    let carb_split = split(target.carb_g);
    let fat_split = split(target.fat_g);

    let mut meals = Vec::with_capacity(3);
    let mut calories_so_far = 0;
    for i in 0..3 {
        let carb = &carbs[(offset + i) % carbs.len()];
        let (p, c, f) = (protein_split[i], carb_split[i], fat_split[i]);
        let calories = if i < 2 {
            p * 4 + c * 4 + f * 9
        } else {
            target.calories - calories_so_far
        };
        calories_so_far += calories;

        meals.push(Meal {
            name: format!("{} with {}", protein.label, carb.label),
            meal_type: MEAL_TYPES[i],
            calories,
            protein_g: p as f64,
            carb_g: c as f64,
            fat_g: f as f64,
            ingredients: portion_ingredients(protein, carb, p as f64, c as f64, f as f64),
            instructions: template_steps(protein, carb),
            prep_time_minutes: Some(TEMPLATE_PREP_MINUTES),
            cook_time_minutes: Some(TEMPLATE_COOK_MINUTES),
            tips: vec!["Cook the day's portions in one batch; they keep 3 days chilled.".to_string()],
        });
    }

    let totals = DayTotals {
        calories: target.calories,
        protein_g: target.protein_g as f64,
        carb_g: target.carb_g as f64,
        fat_g: target.fat_g as f64,
    };
    DayPlan {
        target,
        meals,
        totals,
        needs_regeneration: false,
    }
}

/// Sizes vegetable, protein, carb and oil portions in that order, each
/// covering what the previous ones left of its macro.
fn portion_ingredients(protein: &Food, carb: &Food, p: f64, c: f64, f: f64) -> Vec<Ingredient> {
    let veg = VEGETABLE.macros().scaled(VEGETABLE_GRAMS / 100.0);

    let protein_grams = grams_for((p - veg.protein_g).max(0.0), protein.macros().protein_g);
    let from_protein = protein.macros().scaled(protein_grams / 100.0);

    let carb_grams = grams_for((c - veg.carb_g - from_protein.carb_g).max(0.0), carb.macros().carb_g);
    let from_carb = carb.macros().scaled(carb_grams / 100.0);

    let fat_left = f - veg.fat_g - from_protein.fat_g - from_carb.fat_g;
    let oil_grams = grams_for(fat_left.max(0.0), OIL.macros().fat_g);

    let mut ingredients = vec![ingredient(protein, protein_grams, IngredientCategory::Protein)];
    if carb_grams > 0.0 {
        ingredients.push(ingredient(carb, carb_grams, IngredientCategory::Carb));
    }
    ingredients.push(ingredient(&VEGETABLE, VEGETABLE_GRAMS, IngredientCategory::Vegetable));
    if oil_grams > 0.0 {
        ingredients.push(ingredient(&OIL, oil_grams, IngredientCategory::Fat));
    }
    ingredients
}

fn grams_for(needed: f64, per_100g: f64) -> f64 {
    if per_100g <= 0.0 {
        return 0.0;
    }
    (needed / per_100g * 100.0).round()
}

fn ingredient(food: &Food, grams: f64, category: IngredientCategory) -> Ingredient {
    Ingredient {
        name: food.name.to_string(),
        quantity: grams,
        unit: "g".to_string(),
        category,
        nutrition: food.macros().scaled(grams / 100.0).rounded(),
        usda_reference_id: None,
        verified: false,
    }
}
