use chrono::NaiveDate;

use crate::{
    error::GenerationError,
    models::nutrition::{NutritionTarget, TargetInputs},
};

/// Maintenance calories per pound of body weight.
pub const MAINTENANCE_KCAL_PER_LB: f64 = 15.0;
pub const TRAINING_DAY_SURPLUS: f64 = 500.0;
pub const REST_DAY_SURPLUS: f64 = 100.0;
/// Share of total calories that comes from fat.
pub const FAT_CALORIE_SHARE: f64 = 0.25;
/// Protein ceiling above the goal weight, in grams.
pub const PROTEIN_GOAL_MARGIN_G: f64 = 15.0;

pub struct TargetCalculator;

impl TargetCalculator {
    /// Daily targets for one day.
    ///
    /// Fat is rounded before carbs are derived from the remaining calories, so
    /// `protein*4 + fat*9 + carbs*4` stays within 2 kcal of `calories`.
    pub fn calculate(
        date: NaiveDate,
        body_weight_lbs: f64,
        goal_weight_lbs: Option<f64>,
        is_training_day: bool,
    ) -> Result<NutritionTarget, GenerationError> {
        if !body_weight_lbs.is_finite() || body_weight_lbs <= 0.0 {
            return Err(GenerationError::invalid_input(format!(
                "body weight must be positive, got {body_weight_lbs}"
            )));
        }
        if let Some(goal) = goal_weight_lbs {
            if !goal.is_finite() || goal <= 0.0 {
                return Err(GenerationError::invalid_input(format!(
                    "goal weight must be positive, got {goal}"
                )));
            }
        }

        let maintenance = body_weight_lbs * MAINTENANCE_KCAL_PER_LB;
        let surplus = if is_training_day { TRAINING_DAY_SURPLUS } else { REST_DAY_SURPLUS };
        let calories = (maintenance + surplus).round() as i32;

        let protein_cap = goal_weight_lbs.unwrap_or(body_weight_lbs) + PROTEIN_GOAL_MARGIN_G;
        let protein_g = body_weight_lbs.min(protein_cap).round() as i32;

        let fat_g = (calories as f64 * FAT_CALORIE_SHARE / 9.0).round() as i32;
        let carb_g = ((calories - protein_g * 4 - fat_g * 9) as f64 / 4.0).round().max(0.0) as i32;

        Ok(NutritionTarget {
            date,
            is_training_day,
            calories,
            protein_g,
            fat_g,
            carb_g,
        })
    }

    /// One target per day starting at `start`, training days taken from the
    /// profile's weekly schedule.
    pub fn for_range(
        inputs: &TargetInputs,
        start: NaiveDate,
        day_count: u8,
    ) -> Result<Vec<NutritionTarget>, GenerationError> {
        if day_count != 1 && day_count != 7 {
            return Err(GenerationError::invalid_input(format!(
                "day_count must be 1 or 7, got {day_count}"
            )));
        }
        start
            .iter_days()
            .take(day_count as usize)
            .map(|date| {
                Self::calculate(
                    date,
                    inputs.body_weight_lbs,
                    inputs.goal_weight_lbs,
                    inputs.is_training_day(date),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn training_day_for_175_lbs() {
        let t = TargetCalculator::calculate(day(), 175.0, None, true).unwrap();
        assert_eq!(t.calories, 3125);
        assert_eq!(t.protein_g, 175);
        assert_eq!(t.fat_g, 87);
        assert!((t.carb_g - 411).abs() <= 1);
    }

    #[test]
    fn rest_day_for_175_lbs() {
        let t = TargetCalculator::calculate(day(), 175.0, None, false).unwrap();
        assert_eq!(t.calories, 2725);
        assert_eq!(t.protein_g, 175);
        assert_eq!(t.fat_g, 76);
        assert!((t.carb_g - 336).abs() <= 1);
    }

    #[test]
    fn calories_match_macros_within_two() {
        for weight in [95.0, 120.5, 150.0, 175.0, 199.9, 260.0] {
            for training in [true, false] {
                let t = TargetCalculator::calculate(day(), weight, Some(weight - 20.0), training).unwrap();
                assert!((t.calories - t.macro_calories()).abs() <= 2, "{weight} {training}: {t:?}");
            }
        }
    }

    #[test]
    fn protein_is_capped_by_goal_weight() {
        let t = TargetCalculator::calculate(day(), 220.0, Some(180.0), true).unwrap();
        assert_eq!(t.protein_g, 195);
        let t = TargetCalculator::calculate(day(), 150.0, Some(170.0), true).unwrap();
        assert_eq!(t.protein_g, 150);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = TargetCalculator::calculate(day(), 181.3, Some(175.0), false).unwrap();
        let b = TargetCalculator::calculate(day(), 181.3, Some(175.0), false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_positive_weight() {
        assert!(matches!(
            TargetCalculator::calculate(day(), 0.0, None, true),
            Err(GenerationError::InvalidInput(_))
        ));
        assert!(TargetCalculator::calculate(day(), -10.0, None, true).is_err());
        assert!(TargetCalculator::calculate(day(), f64::NAN, None, true).is_err());
    }

    #[test]
    fn week_uses_training_schedule() {
        let inputs = TargetInputs {
            body_weight_lbs: 175.0,
            goal_weight_lbs: None,
            training_days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
        };
        let week = TargetCalculator::for_range(&inputs, day(), 7).unwrap();
        assert_eq!(week.len(), 7);
        let training: Vec<bool> = week.iter().map(|t| t.is_training_day).collect();
        assert_eq!(training, vec![true, false, true, false, true, false, false]);
        assert!(TargetCalculator::for_range(&inputs, day(), 3).is_err());
    }
}
