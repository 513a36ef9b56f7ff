use chrono::Weekday;
use sqlx::PgPool;
use uuid::Uuid;

use super::recipes::StoreError;
use crate::{error::GenerationError, models::nutrition::TargetInputs};

pub const DEFAULT_TRAINING_DAYS: [Weekday; 3] = [Weekday::Mon, Weekday::Wed, Weekday::Fri];

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    body_weight_lbs: f64,
    goal_weight_lbs: Option<f64>,
    training_days: Option<Vec<String>>,
}

pub struct ProfileService;

impl ProfileService {
    /// Body weight, goal weight and weekly training schedule for the target calculator.
    pub async fn load_target_inputs(pool: &PgPool, user_id: Uuid) -> Result<TargetInputs, GenerationError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"SELECT body_weight_lbs, goal_weight_lbs, training_days
               FROM user_profiles
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?
        .ok_or_else(|| GenerationError::invalid_input("no profile with a body weight for this user"))?;

        Ok(TargetInputs {
            body_weight_lbs: row.body_weight_lbs,
            goal_weight_lbs: row.goal_weight_lbs,
            training_days: parse_training_days(row.training_days.as_deref().unwrap_or_default()),
        })
    }
}

/// Weekday names in any case (`monday`, `Mon`); unknown entries are skipped.
/// An empty schedule falls back to Monday, Wednesday and Friday.
pub fn parse_training_days(days: &[String]) -> Vec<Weekday> {
    let mut parsed = Vec::new();
    for day in days {
        match day.trim().parse::<Weekday>() {
            Ok(weekday) if !parsed.contains(&weekday) => parsed.push(weekday),
            Ok(_) => {}
            Err(_) => tracing::warn!("Ignoring unknown training day '{}'", day),
        }
    }
    if parsed.is_empty() {
        DEFAULT_TRAINING_DAYS.to_vec()
    } else {
        parsed
    }
}
