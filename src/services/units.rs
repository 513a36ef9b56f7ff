/// Converts a recipe quantity to grams, the basis of nutrition database values.
///
/// Volume units use water-density approximations. Unknown units are treated
/// as grams.
pub fn to_grams(quantity: f64, unit: &str) -> f64 {
    let unit = unit.trim().to_lowercase();
    let unit = unit.trim_end_matches('.');
    let factor = match unit {
        "" | "g" | "gram" | "grams" | "gr" => 1.0,
        "kg" | "kilogram" | "kilograms" => 1000.0,
        "mg" | "milligram" | "milligrams" => 0.001,
        "oz" | "ounce" | "ounces" => 28.35,
        "lb" | "lbs" | "pound" | "pounds" => 453.592,
        "ml" | "milliliter" | "milliliters" => 1.0,
        "l" | "liter" | "liters" => 1000.0,
        "cup" | "cups" => 240.0,
        "tbsp" | "tablespoon" | "tablespoons" => 15.0,
        "tsp" | "teaspoon" | "teaspoons" => 5.0,
        "piece" | "pieces" | "whole" | "egg" | "eggs" | "large" | "medium" => 50.0,
        "slice" | "slices" => 30.0,
        other => {
            tracing::warn!("Unknown unit '{}', assuming grams", other);
            1.0
        }
    };
    quantity * factor
}
