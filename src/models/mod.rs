pub mod auth;
pub mod meal_plan;
pub mod nutrition;
pub mod recipe;
