//! End-to-end meal plan generation: lock, prompt, parse, validate, persist.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::cache::CacheStore;
use super::llm::GenerativeProvider;
use super::lock::{generation_lock_key, CacheLock, DistributedLock, LockGuard};
use super::metrics::{GENERATIONS_COUNTER, LOCK_CONTENTION_COUNTER};
use super::nutrition::NutritionValidator;
use super::plan_parser::parse_plan;
use super::prompt::{build_prompt, build_strict_prompt};
use super::recipes::{RecipePersistence, RecipeStore};
use super::retry::RetryPolicy;
use super::template::TemplatePlanner;
use super::usda::NutritionDatabase;
use super::variety::VarietyTracker;
use crate::error::GenerationError;
use crate::models::meal_plan::{
    GeneratedMealPlan, GenerationRequest, GenerationState, PlanSource, PlanVerification,
    PlanWarning, ShoppingItem, ValidatedPlan,
};
use crate::models::recipe::SavedPlanRef;

/// Numeric policy of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Ingredient calorie variance above which the database value wins.
    pub variance_tolerance: f64,
    /// Day calorie deviation above which the day is flagged.
    pub day_tolerance: f64,
    pub history_cap: usize,
    pub variety_window: Duration,
    /// Lock lifetime granted for each step after the provider call. The
    /// initial lease also covers every provider attempt.
    pub lock_ttl_secs: u64,
    pub generation_timeout: Duration,
    pub lookup_timeout: Duration,
    pub nutrition_cache_ttl_secs: u64,
    pub lookup_concurrency: usize,
    /// Consecutive transport failures after which lookups stop for the request.
    pub outage_threshold: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            variance_tolerance: 0.10,
            day_tolerance: 0.05,
            history_cap: 30,
            variety_window: Duration::from_secs(14 * 24 * 3600),
            lock_ttl_secs: 60,
            generation_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(5),
            nutrition_cache_ttl_secs: 7 * 24 * 3600,
            lookup_concurrency: 4,
            outage_threshold: 3,
        }
    }
}

/// Everything a successful generation produced.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    #[serde(flatten)]
    pub validated: ValidatedPlan,
    pub saved: SavedPlanRef,
    pub shopping_list: Vec<ShoppingItem>,
    pub source: PlanSource,
    pub states: Vec<GenerationState>,
}

pub struct GenerationOrchestrator {
    provider: Arc<dyn GenerativeProvider>,
    validator: NutritionValidator,
    variety: VarietyTracker,
    lock: Arc<dyn DistributedLock>,
    persistence: RecipePersistence,
    retry: RetryPolicy<GenerationError>,
    settings: EngineSettings,
}

impl GenerationOrchestrator {
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        database: Option<Arc<dyn NutritionDatabase>>,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecipeStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            validator: NutritionValidator::new(database, cache.clone(), &settings),
            variety: VarietyTracker::new(cache.clone(), settings.history_cap, settings.variety_window),
            lock: Arc::new(CacheLock::new(cache)),
            persistence: RecipePersistence::new(store),
            retry: RetryPolicy::generation(),
            settings,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy<GenerationError>) -> Self {
        self.retry = retry;
        self
    }

    pub fn variety(&self) -> &VarietyTracker {
        &self.variety
    }

    pub fn persistence(&self) -> &RecipePersistence {
        &self.persistence
    }

    /// Runs one generation for the request's user. Fails fast with
    /// `ConcurrentGeneration` while another one holds the user's lock.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        let user_id = request.user_id;
        let key = generation_lock_key(user_id);

        let guard = match self.lock.acquire(&key, self.initial_lock_ttl()).await {
            Ok(Some(guard)) => Some(guard),
            Ok(None) => {
                LOCK_CONTENTION_COUNTER.inc();
                tracing::warn!("Generation already running for user {}", user_id);
                return Err(GenerationError::ConcurrentGeneration(user_id));
            }
            Err(e) => {
                tracing::warn!("Lock store unavailable, generating without lock: {}", e);
                None
            }
        };

        tracing::info!(
            "Generating {}-day plan for user {}",
            request.day_count,
            user_id
        );
        let mut states = vec![GenerationState::Pending];
        let result = self.run_pipeline(&request, guard.as_ref(), &mut states).await;

        if let Some(guard) = guard {
            self.release(&guard).await;
        }

        match &result {
            Ok(outcome) => {
                GENERATIONS_COUNTER
                    .with_label_values(&["completed", outcome.source.as_str()])
                    .inc();
                tracing::info!(
                    "Generation completed for user {} (source: {}, {:?})",
                    user_id,
                    outcome.source.as_str(),
                    outcome.validated.verification
                );
            }
            Err(e) => {
                GENERATIONS_COUNTER.with_label_values(&["failed", "none"]).inc();
                tracing::error!("Generation failed for user {}: {}", user_id, e);
            }
        }
        result
    }

    /// Worst case of the provider phase (every attempt timing out plus the
    /// backoff between them) with one step lease on top.
    fn initial_lock_ttl(&self) -> Duration {
        self.settings
            .generation_timeout
            .saturating_mul(self.retry.max_attempts)
            + self.retry.max_total_delay()
            + Duration::from_secs(self.settings.lock_ttl_secs)
    }

    /// Renews the lease before a step that does external I/O.
    async fn extend(&self, guard: Option<&LockGuard>) {
        let Some(guard) = guard else {
            return;
        };
        let ttl = Duration::from_secs(self.settings.lock_ttl_secs);
        match self.lock.extend(guard, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Generation lock {} was lost before it could be extended", guard.key)
            }
            Err(e) => tracing::warn!("Failed to extend {}: {}", guard.key, e),
        }
    }

    async fn release(&self, guard: &LockGuard) {
        match self.lock.release(guard).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Generation lock {} expired before release", guard.key),
            Err(e) => tracing::warn!("Failed to release {}: {}", guard.key, e),
        }
    }

    async fn run_pipeline(
        &self,
        request: &GenerationRequest,
        guard: Option<&LockGuard>,
        states: &mut Vec<GenerationState>,
    ) -> Result<GenerationOutcome, GenerationError> {
        advance(states, GenerationState::Generating);
        let exclusions = match self.variety.get_exclusions(request.user_id).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Variety history unavailable, generating without exclusions: {}", e);
                Vec::new()
            }
        };
        let seed = Utc::now().timestamp_millis().unsigned_abs();
        let (plan, source) = self.generate_plan(request, &exclusions, seed).await;

        advance(states, GenerationState::Validating);
        self.extend(guard).await;
        let mut validated = match source {
            PlanSource::Template => ValidatedPlan {
                plan,
                verification: PlanVerification::Template,
                corrections: 0,
                warnings: Vec::new(),
            },
            _ => self.validator.validate(plan).await,
        };
        for violation in VarietyTracker::validate_week(&validated.plan) {
            tracing::warn!("Variety rule broken for user {}: {:?}", request.user_id, violation);
            validated.warnings.push(PlanWarning::Variety(violation));
        }

        advance(states, GenerationState::Persisting);
        self.extend(guard).await;
        let saved = match self.persistence.save(&validated, request, source).await {
            Ok(saved) => saved,
            Err(e) => {
                advance(states, GenerationState::Failed(e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = self
            .variety
            .record(request.user_id, &validated.plan.recipe_names())
            .await
        {
            tracing::warn!("Failed to record variety history for {}: {}", request.user_id, e);
        }

        advance(states, GenerationState::Completed);
        Ok(GenerationOutcome {
            shopping_list: validated.plan.shopping_list(),
            validated,
            saved,
            source,
            states: states.clone(),
        })
    }

    /// Provider first, one strict re-prompt, then the template. Never fails.
    async fn generate_plan(
        &self,
        request: &GenerationRequest,
        exclusions: &[String],
        seed: u64,
    ) -> (GeneratedMealPlan, PlanSource) {
        let timeout = self.settings.generation_timeout;
        let provider = &self.provider;
        let result = self
            .retry
            .run(|attempt| async move {
                let prompt = if attempt.is_retry() {
                    tracing::info!("Re-prompting with schema-only instruction");
                    build_strict_prompt(request, exclusions, seed, attempt.last_error.as_deref())
                } else {
                    build_prompt(request, exclusions, seed)
                };
                let raw = match tokio::time::timeout(timeout, provider.complete(&prompt)).await {
                    Ok(answer) => answer?,
                    Err(_) => return Err(GenerationError::GenerationTimeout(timeout.as_secs())),
                };
                let plan = parse_plan(&raw, &request.targets)
                    .map_err(|e| GenerationError::GenerationParse(e.to_string()))?;
                let source = if attempt.is_retry() {
                    PlanSource::StrictRetry
                } else {
                    PlanSource::Provider
                };
                Ok((plan, source))
            })
            .await;

        match result {
            Ok(generated) => generated,
            Err(e) => {
                tracing::warn!(
                    "Provider {} gave no usable plan, using template: {}",
                    self.provider.name(),
                    e
                );
                (TemplatePlanner::build(request), PlanSource::Template)
            }
        }
    }
}

fn advance(states: &mut Vec<GenerationState>, next: GenerationState) {
    if let Some(current) = states.last() {
        debug_assert!(
            current.can_transition_to(&next),
            "illegal transition {current:?} -> {next:?}"
        );
    }
    tracing::debug!("Generation state: {:?}", next);
    states.push(next);
}
