use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_CARB: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

/// Calories and macronutrients for some amount of food.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub calories: f64,
    pub protein_g: f64,
    pub carb_g: f64,
    pub fat_g: f64,
}

impl Macros {
    pub fn new(calories: f64, protein_g: f64, carb_g: f64, fat_g: f64) -> Self {
        Self { calories, protein_g, carb_g, fat_g }
    }

    /// Energy implied by the macronutrients alone (4/4/9 kcal per gram).
    pub fn macro_calories(&self) -> f64 {
        self.protein_g * KCAL_PER_G_PROTEIN
            + self.carb_g * KCAL_PER_G_CARB
            + self.fat_g * KCAL_PER_G_FAT
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            protein_g: self.protein_g * factor,
            carb_g: self.carb_g * factor,
            fat_g: self.fat_g * factor,
        }
    }

    /// Rounded for presentation: whole kcal, one decimal for grams.
    pub fn rounded(&self) -> Self {
        Self {
            calories: self.calories.round(),
            protein_g: round1(self.protein_g),
            carb_g: round1(self.carb_g),
            fat_g: round1(self.fat_g),
        }
    }

    pub fn is_finite_non_negative(&self) -> bool {
        [self.calories, self.protein_g, self.carb_g, self.fat_g]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

impl std::ops::Add for Macros {
    type Output = Macros;

    fn add(self, rhs: Macros) -> Macros {
        Macros {
            calories: self.calories + rhs.calories,
            protein_g: self.protein_g + rhs.protein_g,
            carb_g: self.carb_g + rhs.carb_g,
            fat_g: self.fat_g + rhs.fat_g,
        }
    }
}

impl std::iter::Sum for Macros {
    fn sum<I: Iterator<Item = Macros>>(iter: I) -> Macros {
        iter.fold(Macros::default(), |acc, m| acc + m)
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Daily calorie and macro targets. Recomputed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutritionTarget {
    pub date: NaiveDate,
    pub is_training_day: bool,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carb_g: i32,
}

impl NutritionTarget {
    pub fn macro_calories(&self) -> i32 {
        self.protein_g * 4 + self.fat_g * 9 + self.carb_g * 4
    }

    pub fn day_type(&self) -> &'static str {
        if self.is_training_day {
            "training day"
        } else {
            "rest day"
        }
    }
}

/// Inputs the target calculator needs, as read from the user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInputs {
    pub body_weight_lbs: f64,
    pub goal_weight_lbs: Option<f64>,
    pub training_days: Vec<Weekday>,
}

impl TargetInputs {
    pub fn is_training_day(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        self.training_days.contains(&date.weekday())
    }
}

/// Query params for GET /nutrition/targets.
#[derive(Debug, Deserialize)]
pub struct TargetsQuery {
    /// ISO 8601 date; defaults to today.
    pub date: Option<NaiveDate>,
    /// Overrides the profile's training schedule for this day.
    pub training_day: Option<bool>,
}
