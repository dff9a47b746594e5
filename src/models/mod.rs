mod detection;
mod nutrition;
mod telemetry;

pub use detection::{DetectionResult, DetectionSource, Prediction};
pub use nutrition::{FoodResult, NutritionRecord, NutritionSource};
pub use telemetry::{FallbackLogEntry, FallbackReason};
