mod lookup;
mod reconcile;

pub use lookup::{FoodCandidate, FoodNutrient, NutritionLookup, UsdaLookupClient};
pub use reconcile::NutritionReconciler;
