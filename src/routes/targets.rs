use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::Value;

use crate::{
    models::{auth::AuthenticatedUser, nutrition::{NutritionTarget, TargetsQuery}},
    services::{profile::ProfileService, targets::TargetCalculator},
    AppState,
};

/// GET /nutrition/targets?date=YYYY-MM-DD&training_day=true
pub async fn get_targets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<TargetsQuery>,
) -> Result<Json<NutritionTarget>, (StatusCode, Json<Value>)> {
    let inputs = ProfileService::load_target_inputs(&state.db, user.user_id)
        .await
        .map_err(|e| e.into_response_parts())?;

    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let is_training_day = params
        .training_day
        .unwrap_or_else(|| inputs.is_training_day(date));

    TargetCalculator::calculate(date, inputs.body_weight_lbs, inputs.goal_weight_lbs, is_training_day)
        .map(Json)
        .map_err(|e| e.into_response_parts())
}
