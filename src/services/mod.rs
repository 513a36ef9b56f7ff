pub mod cache;
pub mod generation;
pub mod llm;
pub mod lock;
pub mod metrics;
pub mod normalize;
pub mod nutrition;
pub mod plan_parser;
pub mod profile;
pub mod prompt;
pub mod rate_limit;
pub mod recipes;
pub mod retry;
pub mod shopping;
pub mod targets;
pub mod template;
pub mod units;
pub mod usda;
pub mod variety;
