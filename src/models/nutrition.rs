//! Nutrition data model.

use serde::{Deserialize, Serialize};

/// Upper bound on a plausible per-serving calorie value.
pub const MAX_CALORIES: f64 = 10_000.0;
/// Upper bound on a plausible per-serving macro value in grams.
pub const MAX_MACRO_GRAMS: f64 = 1_000.0;

/// Per-serving macronutrient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl NutritionRecord {
    pub fn new(calories: f64, protein_g: f64, carbs_g: f64, fat_g: f64) -> Self {
        Self {
            calories,
            protein_g,
            carbs_g,
            fat_g,
        }
    }

    /// The fixed fallback used when lookup fails or no candidate validates.
    pub fn generic_estimate() -> Self {
        Self::new(200.0, 10.0, 25.0, 8.0)
    }

    /// A record is usable when every field is non-negative and within sane
    /// bounds, and at least one field is nonzero.
    pub fn is_valid(&self) -> bool {
        let in_range = |value: f64, max: f64| (0.0..=max).contains(&value);

        in_range(self.calories, MAX_CALORIES)
            && in_range(self.protein_g, MAX_MACRO_GRAMS)
            && in_range(self.carbs_g, MAX_MACRO_GRAMS)
            && in_range(self.fat_g, MAX_MACRO_GRAMS)
            && (self.calories > 0.0
                || self.protein_g > 0.0
                || self.carbs_g > 0.0
                || self.fat_g > 0.0)
    }
}

/// Whether nutrition values were looked up or substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NutritionSource {
    Measured,
    Estimated,
}

/// The nutrition-bearing result handed back to the caller. Owned by the
/// caller once returned; nothing in the pipeline keeps a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodResult {
    pub name: String,
    pub portion: String,
    pub nutrition: NutritionRecord,
    pub nutrition_source: NutritionSource,
    pub image_ref: Option<String>,
}

impl FoodResult {
    pub fn is_estimate(&self) -> bool {
        self.nutrition_source == NutritionSource::Estimated
    }
}
