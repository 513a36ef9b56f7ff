#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Days;
use serde_json::Value;
use uuid::Uuid;

use mealplan_api::error::GenerationError;
use mealplan_api::models::meal_plan::{
    GenerationRequest, GenerationState, PlanSource, PlanVerification, PlanWarning, Violation,
};
use mealplan_api::services::cache::{CacheStore, MemoryCache};
use mealplan_api::services::generation::{EngineSettings, GenerationOrchestrator};
use mealplan_api::services::llm::ProviderError;
use mealplan_api::services::lock::{generation_lock_key, CacheLock, DistributedLock};

use support::*;

struct Harness {
    provider: Arc<ScriptedProvider>,
    store: Arc<MemoryRecipeStore>,
    cache: Arc<dyn CacheStore>,
    orchestrator: Arc<GenerationOrchestrator>,
}

fn harness(replies: Vec<Reply>, store: MemoryRecipeStore) -> Harness {
    let provider = Arc::new(ScriptedProvider::new(replies));
    let store = Arc::new(store);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        provider.clone(),
        Some(Arc::new(reference_db())),
        cache.clone(),
        store.clone(),
        EngineSettings::default(),
    ));
    Harness {
        provider,
        store,
        cache,
        orchestrator,
    }
}

fn day_meals() -> Vec<Value> {
    vec![
        honest_meal("Grilled chicken bowl", "chicken breast, cooked", 200.0),
        honest_meal("Chicken snack box", "chicken breast, cooked", 120.0),
        honest_meal("Chicken rice dinner", "chicken breast, cooked", 180.0),
    ]
}

/// A provider answer and the request it satisfies.
fn daily(user_id: Uuid) -> (String, GenerationRequest) {
    let meals = day_meals();
    let target = target_for(monday(), &meals);
    (plan_json(vec![meals]), request(user_id, vec![target]))
}

fn weekly(user_id: Uuid) -> (String, GenerationRequest) {
    let targets = (0..7)
        .map(|i| target_for(monday() + Days::new(i), &day_meals()))
        .collect();
    let answer = plan_json((0..7).map(|_| day_meals()).collect());
    (answer, request(user_id, targets))
}

fn completed_states() -> Vec<GenerationState> {
    vec![
        GenerationState::Pending,
        GenerationState::Generating,
        GenerationState::Validating,
        GenerationState::Persisting,
        GenerationState::Completed,
    ]
}

async fn lock_is_free(cache: &Arc<dyn CacheStore>, user_id: Uuid) -> bool {
    cache.get(&generation_lock_key(user_id)).await.unwrap().is_none()
}

fn assert_matches_targets(outcome: &mealplan_api::services::generation::GenerationOutcome) {
    for day in &outcome.validated.plan.days {
        assert_eq!(day.totals.calories, day.target.calories, "calories on {}", day.date());
        assert_eq!(day.totals.protein_g, day.target.protein_g as f64);
        assert_eq!(day.totals.carb_g, day.target.carb_g as f64);
        assert_eq!(day.totals.fat_g, day.target.fat_g as f64);
    }
}

#[tokio::test]
async fn provider_plan_is_validated_saved_and_remembered() {
    let user = Uuid::new_v4();
    let (answer, request) = daily(user);
    let h = harness(vec![Reply::Text(answer)], MemoryRecipeStore::new());

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::Provider);
    assert_eq!(outcome.validated.verification, PlanVerification::Verified);
    assert_eq!(outcome.states, completed_states());
    assert_eq!(outcome.saved.recipe_ids.len(), 3);
    assert_eq!(outcome.saved.inserted, 3);
    assert_eq!(h.provider.calls().await, 1);

    let state = h.store.state.lock().await;
    assert_eq!(state.recipes.len(), 3);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].1.plan_source, "provider");
    assert_eq!(state.history[0].1.recipe_ids, outcome.saved.recipe_ids);
    assert_eq!(state.history[0].1.shopping_list, outcome.shopping_list);
    drop(state);

    let chicken = &outcome.shopping_list[0];
    assert_eq!((chicken.name.as_str(), chicken.quantity, chicken.meal_count), ("chicken breast", 500.0, 3));

    let exclusions = h.orchestrator.variety().get_exclusions(user).await.unwrap();
    assert_eq!(
        exclusions,
        vec!["Chicken rice dinner", "Chicken snack box", "Grilled chicken bowl"]
    );
    assert!(lock_is_free(&h.cache, user).await);
}

#[tokio::test(start_paused = true)]
async fn unparseable_answers_fall_back_to_template() {
    let user = Uuid::new_v4();
    let (_, request) = weekly(user);
    let h = harness(
        vec![
            Reply::Text("Sure! Here is your plan:".into()),
            Reply::Text(r#"{"days": []}"#.into()),
        ],
        MemoryRecipeStore::new(),
    );

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::Template);
    assert_eq!(outcome.validated.verification, PlanVerification::Template);
    assert_eq!(outcome.states, completed_states());
    assert_eq!(outcome.validated.plan.days.len(), 7);
    assert_matches_targets(&outcome);

    let prompts = h.provider.prompts.lock().await;
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].user.contains("previous answer was rejected"));
    assert!(prompts[1].user.contains("previous answer was rejected"));

    let history = h.orchestrator.persistence().history(user, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].plan_source, "template");
    assert_eq!(history[0].day_count, 7);
}

#[tokio::test(start_paused = true)]
async fn strict_reprompt_can_rescue_a_bad_answer() {
    let user = Uuid::new_v4();
    let (answer, request) = daily(user);
    let h = harness(
        vec![Reply::Text("```json\n{\"days\": [".into()), Reply::Text(answer)],
        MemoryRecipeStore::new(),
    );

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::StrictRetry);
    assert_eq!(outcome.validated.verification, PlanVerification::Verified);
    assert_eq!(h.provider.calls().await, 2);
}

#[tokio::test(start_paused = true)]
async fn hanging_provider_times_out_into_template() {
    let user = Uuid::new_v4();
    let (_, request) = daily(user);
    let h = harness(vec![Reply::Hang, Reply::Hang], MemoryRecipeStore::new());

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::Template);
    assert_eq!(h.provider.calls().await, 2);
    assert_matches_targets(&outcome);
}

#[tokio::test]
async fn disabled_provider_is_not_retried() {
    let user = Uuid::new_v4();
    let (_, request) = daily(user);
    let h = harness(vec![Reply::Error(ProviderError::Disabled)], MemoryRecipeStore::new());

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::Template);
    assert_eq!(h.provider.calls().await, 1);
}

#[tokio::test]
async fn second_generation_for_same_user_is_rejected_while_first_runs() {
    let user = Uuid::new_v4();
    let (answer, request) = daily(user);
    let h = harness(
        vec![Reply::Text(answer.clone()), Reply::Text(answer)],
        MemoryRecipeStore::new(),
    );

    let lock = CacheLock::new(h.cache.clone());
    let guard = lock
        .acquire(&generation_lock_key(user), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let err = h.orchestrator.generate(request.clone()).await.unwrap_err();
    assert!(matches!(err, GenerationError::ConcurrentGeneration(id) if id == user));
    assert_eq!(h.provider.calls().await, 0);

    // other users are unaffected by the held lock
    let other = Uuid::new_v4();
    let (_, other_request) = daily(other);
    assert!(h.orchestrator.generate(other_request).await.is_ok());

    assert!(lock.release(&guard).await.unwrap());
    let outcome = h.orchestrator.generate(request).await.unwrap();
    assert_eq!(outcome.source, PlanSource::Provider);
    assert_eq!(outcome.states.last(), Some(&GenerationState::Completed));
}

#[tokio::test(start_paused = true)]
async fn lock_outlives_a_provider_that_never_answers() {
    let user = Uuid::new_v4();
    let (_, request) = daily(user);
    let h = harness(vec![Reply::Hang, Reply::Hang], MemoryRecipeStore::new());

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        let request = request.clone();
        async move { orchestrator.generate(request).await }
    });

    // past the first attempt's timeout and well into the re-prompt
    tokio::time::sleep(Duration::from_millis(60_200)).await;
    assert!(!first.is_finished());
    assert!(!lock_is_free(&h.cache, user).await);

    let err = h.orchestrator.generate(request).await.unwrap_err();
    assert!(matches!(err, GenerationError::ConcurrentGeneration(id) if id == user));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.source, PlanSource::Template);
    assert_eq!(h.provider.calls().await, 2);
    assert_eq!(h.store.state.lock().await.history.len(), 1);
    assert!(lock_is_free(&h.cache, user).await);
}

#[tokio::test]
async fn generations_for_different_users_run_on_spawned_tasks() {
    let (first_user, second_user) = (Uuid::new_v4(), Uuid::new_v4());
    let (answer, first_request) = daily(first_user);
    let (_, second_request) = daily(second_user);
    let h = harness(
        vec![Reply::Text(answer.clone()), Reply::Text(answer)],
        MemoryRecipeStore::new(),
    );

    let tasks: Vec<_> = [first_request, second_request]
        .into_iter()
        .map(|request| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.generate(request).await })
        })
        .collect();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.source, PlanSource::Provider);
    }

    let state = h.store.state.lock().await;
    assert_eq!(state.history.len(), 2);
    assert!(lock_is_free(&h.cache, first_user).await);
    assert!(lock_is_free(&h.cache, second_user).await);
}

#[tokio::test]
async fn persistence_conflict_fails_and_releases_lock() {
    let user = Uuid::new_v4();
    let (answer, request) = daily(user);
    let h = harness(
        vec![Reply::Text(answer)],
        MemoryRecipeStore::with_conflicts(Conflicts::Always),
    );

    let err = h.orchestrator.generate(request).await.unwrap_err();

    assert!(matches!(err, GenerationError::PersistenceConflict(ref name) if name == "Grilled chicken bowl"));
    assert!(lock_is_free(&h.cache, user).await);
    assert!(h.orchestrator.variety().get_exclusions(user).await.unwrap().is_empty());
    assert!(h.store.state.lock().await.history.is_empty());
}

#[tokio::test]
async fn recent_recipes_are_excluded_from_next_prompt() {
    let user = Uuid::new_v4();
    let (answer, request) = daily(user);
    let h = harness(
        vec![Reply::Text(answer.clone()), Reply::Text(answer)],
        MemoryRecipeStore::new(),
    );

    h.orchestrator.generate(request.clone()).await.unwrap();
    let second = h.orchestrator.generate(request).await.unwrap();

    let prompts = h.provider.prompts.lock().await;
    assert!(!prompts[0].user.contains("Grilled chicken bowl"));
    assert!(prompts[1].user.contains("Grilled chicken bowl"));

    // same meals again: stored rows are reused, not duplicated
    assert_eq!(second.saved.reused, 3);
    assert_eq!(h.store.state.lock().await.recipes.len(), 3);
}

#[tokio::test]
async fn repetitive_week_is_saved_with_variety_warnings() {
    let user = Uuid::new_v4();
    let (answer, request) = weekly(user);
    let h = harness(vec![Reply::Text(answer)], MemoryRecipeStore::new());

    let outcome = h.orchestrator.generate(request).await.unwrap();

    assert_eq!(outcome.source, PlanSource::Provider);
    assert_eq!(outcome.saved.inserted, 3);
    assert_eq!(outcome.saved.reused, 18);
    let variety: Vec<&Violation> = outcome
        .validated
        .warnings
        .iter()
        .filter_map(|w| match w {
            PlanWarning::Variety(v) => Some(v),
            _ => None,
        })
        .collect();
    assert!(variety
        .iter()
        .any(|v| matches!(v, Violation::RecipeRepeated { count: 7, .. })));
    assert!(variety
        .iter()
        .any(|v| matches!(v, Violation::ConsecutiveProtein { day: 2, .. })));
    assert!(variety
        .iter()
        .any(|v| matches!(v, Violation::TooFewProteinSources { found: 1 })));
}
