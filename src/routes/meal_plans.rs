use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    error::GenerationError,
    middleware::rate_limit::check_generation_quota,
    models::{
        auth::AuthenticatedUser,
        meal_plan::{GenerateMealPlanRequest, GenerationRequest},
        recipe::HistoryQuery,
    },
    services::{generation::GenerationOutcome, profile::ProfileService, targets::TargetCalculator},
    AppState,
};

const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// POST /meal-plans/generate
///
/// 400 on bad input, 409 while another generation runs for the user,
/// 429 over the hourly quota. Any other failure upstream still yields a plan.
pub async fn generate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<GenerateMealPlanRequest>,
) -> Result<(StatusCode, Json<GenerationOutcome>), (StatusCode, Json<Value>)> {
    check_generation_quota(state.cache.as_ref(), user.user_id, state.config.generation_rate_limit)
        .await?;

    let inputs = ProfileService::load_target_inputs(&state.db, user.user_id)
        .await
        .map_err(GenerationError::into_response_parts)?;
    let start = body.start_date.unwrap_or_else(|| Utc::now().date_naive());
    let targets = TargetCalculator::for_range(&inputs, start, body.day_count)
        .map_err(GenerationError::into_response_parts)?;
    let request = GenerationRequest::new(user.user_id, body.dietary_requirements, body.budget, targets)
        .map_err(GenerationError::into_response_parts)?;

    let outcome = state
        .orchestrator
        .generate(request)
        .await
        .map_err(GenerationError::into_response_parts)?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /meal-plans/history?limit=20
pub async fn history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let records = state
        .orchestrator
        .persistence()
        .history(user.user_id, params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await
        .map_err(GenerationError::into_response_parts)?;
    Ok(Json(json!({ "history": records })))
}
