#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use mealplan_api::error::GenerationError;
use mealplan_api::models::meal_plan::{PlanSource, PlanVerification, ValidatedPlan};
use mealplan_api::services::plan_parser::parse_plan;
use mealplan_api::services::recipes::{recipe_signature, RecipePersistence, MAX_SAVE_ATTEMPTS};

use support::*;

fn validated(meals: Vec<serde_json::Value>) -> ValidatedPlan {
    let target = target_for(monday(), &meals);
    ValidatedPlan {
        plan: parse_plan(&plan_json(vec![meals]), &[target]).unwrap(),
        verification: PlanVerification::Verified,
        corrections: 0,
        warnings: Vec::new(),
    }
}

fn persistence(store: &Arc<MemoryRecipeStore>) -> RecipePersistence {
    RecipePersistence::new(store.clone())
}

#[tokio::test]
async fn repeated_meal_reuses_stored_recipe() {
    let store = Arc::new(MemoryRecipeStore::new());
    let user = Uuid::new_v4();
    let bowl = honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0);
    // same recipe, different spelling
    let bowl_again = honest_meal("chicken rice bowl!", "chicken breast, cooked", 200.0);
    let plan = validated(vec![bowl, bowl_again]);
    let req = request(user, plan.plan.days.iter().map(|d| d.target).collect());

    let saved = persistence(&store).save(&plan, &req, PlanSource::Provider).await.unwrap();

    assert_eq!(saved.inserted, 1);
    assert_eq!(saved.reused, 1);
    assert_eq!(saved.recipe_ids[0], saved.recipe_ids[1]);
    let state = store.state.lock().await;
    assert_eq!(state.recipes.len(), 1);
    assert_eq!(state.recipes[0].times_generated, 2);
    assert_eq!(state.recipes[0].recipe.normalized_name, "chicken rice bowl");
    assert_eq!(state.recipes[0].recipe.ingredients.len(), 3);
}

#[tokio::test]
async fn recipes_are_scoped_per_user() {
    let store = Arc::new(MemoryRecipeStore::new());
    let plan = validated(vec![honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0)]);
    let targets: Vec<_> = plan.plan.days.iter().map(|d| d.target).collect();

    let a = persistence(&store)
        .save(&plan, &request(Uuid::new_v4(), targets.clone()), PlanSource::Provider)
        .await
        .unwrap();
    let b = persistence(&store)
        .save(&plan, &request(Uuid::new_v4(), targets), PlanSource::Provider)
        .await
        .unwrap();

    assert_eq!((a.inserted, b.inserted), (1, 1));
    assert_ne!(a.recipe_ids, b.recipe_ids);
}

#[tokio::test]
async fn lost_insert_race_resolves_through_dedup() {
    let store = Arc::new(MemoryRecipeStore::with_conflicts(Conflicts::LoseRaces(1)));
    let user = Uuid::new_v4();
    let plan = validated(vec![honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0)]);
    let req = request(user, plan.plan.days.iter().map(|d| d.target).collect());

    let saved = persistence(&store).save(&plan, &req, PlanSource::Provider).await.unwrap();

    assert_eq!(saved.reused, 1);
    assert_eq!(store.insert_attempts.load(Ordering::SeqCst), 1);
    let state = store.state.lock().await;
    assert_eq!(state.recipes.len(), 1);
    assert_eq!(state.recipes[0].id, saved.recipe_ids[0]);
    assert_eq!(state.recipes[0].times_generated, 2);
}

#[tokio::test]
async fn endless_conflicts_give_up_after_bounded_attempts() {
    let store = Arc::new(MemoryRecipeStore::with_conflicts(Conflicts::Always));
    let user = Uuid::new_v4();
    let plan = validated(vec![honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0)]);
    let req = request(user, plan.plan.days.iter().map(|d| d.target).collect());

    let err = persistence(&store).save(&plan, &req, PlanSource::Provider).await.unwrap_err();

    assert!(matches!(err, GenerationError::PersistenceConflict(ref name) if name == "Chicken Rice Bowl"));
    assert_eq!(store.insert_attempts.load(Ordering::SeqCst), MAX_SAVE_ATTEMPTS);
    assert!(store.state.lock().await.history.is_empty());
}

#[tokio::test]
async fn conflict_on_a_later_meal_rolls_back_the_whole_plan() {
    let store = Arc::new(MemoryRecipeStore::with_conflicts(Conflicts::OnRecipe("Chicken Snack Box")));
    let user = Uuid::new_v4();
    let bowl = honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0);
    let first = validated(vec![bowl.clone()]);
    let req = request(user, first.plan.days.iter().map(|d| d.target).collect());
    persistence(&store).save(&first, &req, PlanSource::Provider).await.unwrap();

    let second = validated(vec![
        bowl,
        honest_meal("Chicken Snack Box", "chicken breast, cooked", 100.0),
    ]);
    let req = request(user, second.plan.days.iter().map(|d| d.target).collect());
    let err = persistence(&store).save(&second, &req, PlanSource::Provider).await.unwrap_err();

    assert!(matches!(err, GenerationError::PersistenceConflict(ref name) if name == "Chicken Snack Box"));
    let state = store.state.lock().await;
    assert_eq!(state.recipes.len(), 1);
    assert_eq!(state.recipes[0].times_generated, 1);
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn history_row_records_the_generation() {
    let store = Arc::new(MemoryRecipeStore::new());
    let user = Uuid::new_v4();
    let mut bowl = honest_meal("Chicken Rice Bowl", "chicken breast, cooked", 200.0);
    bowl["instructions"] = json!(["Cook the rice", "Grill the chicken"]);
    bowl["prep_time"] = json!(10);
    bowl["cook_time"] = json!(20);
    let plan = validated(vec![
        bowl,
        honest_meal("Chicken Snack Box", "chicken breast, cooked", 100.0),
    ]);
    let targets = plan.plan.days.iter().map(|d| d.target).collect();
    let req = mealplan_api::models::meal_plan::GenerationRequest::new(
        user,
        vec!["Gluten-Free".to_string()],
        80.0,
        targets,
    )
    .unwrap();

    let persistence = persistence(&store);
    let saved = persistence.save(&plan, &req, PlanSource::StrictRetry).await.unwrap();

    let history = persistence.history(user, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    let row = &history[0];
    assert_eq!(row.id, saved.history_id);
    assert_eq!(row.recipe_ids, saved.recipe_ids);
    assert_eq!(row.dietary_requirements, vec!["gluten-free".to_string()]);
    assert_eq!(row.day_count, 1);
    assert_eq!(row.plan_source, "strict_retry");
    assert_eq!(store.state.lock().await.history[0].1.budget, 80.0);

    let groceries: Vec<(&str, f64)> = row
        .shopping_list
        .0
        .iter()
        .map(|i| (i.name.as_str(), i.quantity))
        .collect();
    assert_eq!(
        groceries,
        vec![("chicken breast", 300.0), ("white rice", 600.0), ("olive oil", 20.0)]
    );

    let bowl = persistence.recipe(user, saved.recipe_ids[0]).await.unwrap().unwrap();
    assert_eq!(bowl.recipe.instructions, vec!["Cook the rice", "Grill the chicken"]);
    assert_eq!(bowl.recipe.prep_time_minutes, Some(10));
    assert_eq!(bowl.recipe.cook_time_minutes, Some(20));

    let detail = persistence.recipe(user, saved.recipe_ids[1]).await.unwrap().unwrap();
    assert_eq!(detail.recipe.name, "Chicken Snack Box");
    assert_eq!(detail.recipe.signature, recipe_signature(&plan.plan.days[0].meals[1]));
    assert!(persistence.recipe(Uuid::new_v4(), saved.recipe_ids[1]).await.unwrap().is_none());
}
