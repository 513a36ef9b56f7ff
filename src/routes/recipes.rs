use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::GenerationError,
    models::{auth::AuthenticatedUser, recipe::RecipeDetail},
    AppState,
};

/// GET /recipes/{id}: a stored recipe with its ingredients, owner only.
pub async fn get_recipe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(recipe_id): Path<Uuid>,
) -> Result<Json<RecipeDetail>, (StatusCode, Json<Value>)> {
    state
        .orchestrator
        .persistence()
        .recipe(user.user_id, recipe_id)
        .await
        .map_err(GenerationError::into_response_parts)?
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Recipe not found" })),
            )
        })
}
