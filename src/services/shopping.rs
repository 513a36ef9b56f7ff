//! Turns a plan's ingredients into a grocery list.

use std::collections::HashMap;

use super::normalize::{normalize_name, FoodKey};
use super::units::to_grams;
use crate::models::meal_plan::{GeneratedMealPlan, IngredientCategory, ShoppingItem};

fn category_rank(category: IngredientCategory) -> u8 {
    match category {
        IngredientCategory::Protein => 0,
        IngredientCategory::Dairy => 1,
        IngredientCategory::Carb => 2,
        IngredientCategory::Vegetable => 3,
        IngredientCategory::Fruit => 4,
        IngredientCategory::Fat => 5,
        IngredientCategory::Other => 6,
    }
}

/// Merges every ingredient of the plan by food, ignoring how it is prepared
/// ("chicken breast, grilled" and "chicken breast, cooked" are one purchase).
/// Quantities are summed in grams and rounded up to the next whole gram.
/// Sorted by aisle, then name.
pub fn build_shopping_list(plan: &GeneratedMealPlan) -> Vec<ShoppingItem> {
    let mut items: Vec<ShoppingItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for meal in plan.meals() {
        let mut seen_in_meal: Vec<usize> = Vec::new();
        for ingredient in &meal.ingredients {
            let key = FoodKey::parse(&ingredient.name);
            let name = if key.base.is_empty() {
                normalize_name(&ingredient.name)
            } else {
                key.base
            };
            if name.is_empty() {
                continue;
            }
            let grams = to_grams(ingredient.quantity, &ingredient.unit);
            let slot = *index.entry(name.clone()).or_insert_with(|| {
                items.push(ShoppingItem {
                    name,
                    quantity: 0.0,
                    unit: "g".to_string(),
                    category: ingredient.category,
                    meal_count: 0,
                });
                items.len() - 1
            });
            items[slot].quantity += grams;
            if !seen_in_meal.contains(&slot) {
                seen_in_meal.push(slot);
                items[slot].meal_count += 1;
            }
        }
    }

    for item in &mut items {
        item.quantity = item.quantity.ceil();
    }
    items.sort_by(|a, b| {
        category_rank(a.category)
            .cmp(&category_rank(b.category))
            .then_with(|| a.name.cmp(&b.name))
    });
    items
}
