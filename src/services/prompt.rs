use std::fmt::Write as _;

use crate::models::meal_plan::GenerationRequest;

/// System and user messages for one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "You are an expert nutritionist creating meal prep plans with EXACT nutritional accuracy.

Key principles:
1. EXACT MACROS: every day must hit the calorie and macro targets provided (within 2%).
2. REAL RECIPES: practical recipes with common ingredients that store well for 3-5 days.
3. PRECISE MEASUREMENTS: every ingredient has an exact quantity in grams or a standard unit.
4. INTERMITTENT FASTING: all meals fit within the 12pm-8pm eating window.

Every ingredient will be validated against USDA FoodData Central and corrected when it is more than 10% off:
- Use specific food names with the preparation method, e.g. \"chicken breast, boneless, skinless, cooked\" not \"chicken\".
- Include all cooking oils.
- Meal calories must equal protein_g*4 + carb_g*4 + fat_g*9.

Common values per 100g:
- Chicken breast, cooked: 165 kcal, 31g protein, 0g carbs, 3.6g fat
- Rice, white, cooked: 130 kcal, 2.7g protein, 28g carbs, 0.3g fat
- Sweet potato, baked: 90 kcal, 2g protein, 21g carbs, 0.1g fat
- Olive oil: 884 kcal, 0g protein, 0g carbs, 100g fat

Return ONLY valid JSON. No other text.";

/// JSON shape every response must follow.
pub const RESPONSE_SCHEMA: &str = r#"{
  "days": [
    {
      "date": "YYYY-MM-DD",
      "meals": [
        {
          "name": "Recipe name",
          "meal_type": "lunch | dinner | snack | breakfast",
          "calories": 0,
          "protein_g": 0,
          "carb_g": 0,
          "fat_g": 0,
          "ingredients": [
            {
              "name": "chicken breast, cooked",
              "quantity": 170,
              "unit": "g",
              "category": "protein | carb | fat | vegetable | fruit | dairy | other",
              "calories": 0,
              "protein_g": 0,
              "carb_g": 0,
              "fat_g": 0
            }
          ],
          "prep_time_minutes": 0,
          "cook_time_minutes": 0,
          "instructions": ["Step 1", "Step 2"],
          "tips": ["Storage and reheating"]
        }
      ]
    }
  ]
}"#;

/// Eating window: (time, meal type, share of the day's calories).
pub const MEAL_SCHEDULE: [(&str, &str, u32); 3] =
    [("12:00 PM", "lunch", 30), ("4:30 PM", "snack", 35), ("7:30 PM", "dinner", 35)];

pub fn build_prompt(request: &GenerationRequest, exclusions: &[String], seed: u64) -> GenerationPrompt {
    let mut user = String::new();
    let _ = writeln!(
        user,
        "Create a {}-day meal prep plan with EXACT macros for each day:",
        request.day_count
    );
    for target in &request.targets {
        let _ = writeln!(
            user,
            "- {} ({}): {} kcal | protein {}g | carbs {}g | fat {}g",
            target.date, target.day_type(), target.calories, target.protein_g, target.carb_g, target.fat_g
        );
    }

    user.push_str("\nSchedule (intermittent fasting), 3 meals per day:\n");
    for (time, meal_type, share) in MEAL_SCHEDULE {
        let _ = writeln!(user, "- {time} {meal_type} (~{share}% of calories)");
    }

    let restrictions = if request.dietary_requirements.is_empty() {
        "None".to_string()
    } else {
        request
            .dietary_requirements
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let _ = writeln!(user, "\nDietary restrictions: {restrictions}");
    let _ = writeln!(user, "Weekly budget: ${:.2}", request.budget);

    if !exclusions.is_empty() {
        let _ = writeln!(
            user,
            "\nDo NOT use any of these recently generated recipes: {}",
            exclusions.join(", ")
        );
    }

    if request.is_weekly() {
        user.push_str(
            "\nVariety rules:\n\
             - No recipe name more than 2 times in the week.\n\
             - Never the same main protein on two consecutive days.\n\
             - At least 5 different protein sources and 5 different carb sources across the week.\n",
        );
    }

    let _ = writeln!(user, "\nUniqueness seed: {seed}. Use it to vary recipes between requests.");
    let _ = write!(user, "\nReturn JSON with exactly this structure:\n{RESPONSE_SCHEMA}");

    GenerationPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Re-prompt after the previous answer failed to parse.
pub fn build_strict_prompt(
    request: &GenerationRequest,
    exclusions: &[String],
    seed: u64,
    previous_error: Option<&str>,
) -> GenerationPrompt {
    let mut prompt = build_prompt(request, exclusions, seed);
    prompt.user.push_str(
        "\n\nIMPORTANT: respond with JSON only, matching the structure above exactly. \
         No markdown, no comments, no extra fields, every number a plain number.",
    );
    if let Some(error) = previous_error {
        let _ = write!(prompt.user, "\nYour previous answer was rejected: {error}");
    }
    prompt
}
