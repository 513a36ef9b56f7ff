pub mod health;
pub mod meal_plans;
pub mod metrics;
pub mod recipes;
pub mod targets;
