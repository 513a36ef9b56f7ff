use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::services::{
    cache::CacheError, llm::ProviderError, recipes::StoreError, usda::LookupError,
};

/// Failure of one meal plan generation.
///
/// The orchestrator returns `InvalidInput`, `ConcurrentGeneration`,
/// `PersistenceConflict` and `Store` (a database failure while saving or
/// reading history). Provider, lookup and cache failures are absorbed inside
/// the pipeline and degrade to a flagged plan before reaching the caller.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a meal plan generation is already running for user {0}")]
    ConcurrentGeneration(uuid::Uuid),

    #[error("generative provider timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("could not parse generated meal plan: {0}")]
    GenerationParse(String),

    #[error("nutrition lookup failed for '{ingredient}': {source}")]
    ExternalLookupFailure {
        ingredient: String,
        #[source]
        source: LookupError,
    },

    #[error("recipe '{0}' kept conflicting with concurrent saves")]
    PersistenceConflict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerationError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Errors the caller has to handle; everything else is absorbed into a
    /// degraded plan.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::ConcurrentGeneration(_)
                | Self::PersistenceConflict(_)
                | Self::Store(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::ConcurrentGeneration(_) | Self::PersistenceConflict(_) => StatusCode::CONFLICT,
            Self::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Axum rejection in the `(StatusCode, Json)` shape every route returns.
    pub fn into_response_parts(self) -> (StatusCode, Json<Value>) {
        (self.status_code(), Json(json!({ "error": self.to_string() })))
    }
}
