//! Nutrition reconciliation: merge a detected food name with a lookup
//! response into one nutrition-bearing result.

use std::sync::Arc;

use log::{debug, warn};

use crate::models::{FoodResult, NutritionRecord, NutritionSource};
use crate::nutrition::lookup::{FoodCandidate, FoodNutrient, NutritionLookup};

// USDA FoodData Central stable nutrient numbers.
const NUTRIENT_ID_ENERGY: u32 = 1008;
const NUTRIENT_ID_PROTEIN: u32 = 1003;
const NUTRIENT_ID_CARBS: u32 = 1005;
const NUTRIENT_ID_FAT: u32 = 1004;

// Name fallbacks for providers (or data types) that omit the numeric id.
// Matched case-insensitively as substrings, in order.
const ALIASES_ENERGY: &[&str] = &["energy", "calorie"];
const ALIASES_PROTEIN: &[&str] = &["protein"];
const ALIASES_CARBS: &[&str] = &["carbohydrate", "carbs"];
const ALIASES_FAT: &[&str] = &["total lipid", "total fat", "fat"];

const KJ_PER_KCAL: f64 = 4.184;

const DEFAULT_PORTION: &str = "1 serving";

/// Merges detection output with nutrition lookups. Infallible by contract:
/// when lookup fails or nothing validates, the caller gets the fixed generic
/// estimate tagged as such.
pub struct NutritionReconciler {
    lookup: Arc<dyn NutritionLookup>,
    candidate_limit: u32,
}

impl NutritionReconciler {
    pub fn new(lookup: Arc<dyn NutritionLookup>, candidate_limit: u32) -> Self {
        Self {
            lookup,
            candidate_limit,
        }
    }

    pub async fn resolve(&self, food_name: &str, image_ref: Option<String>) -> FoodResult {
        let candidates = match self.lookup.search(food_name, self.candidate_limit).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("nutrition lookup for '{food_name}' failed: {err}; using estimate");
                return estimated_result(food_name, image_ref);
            }
        };

        // First candidate with usable nutrients wins, in provider order, so
        // the same candidate list always selects the same record.
        for candidate in &candidates {
            let record = extract_record(candidate);
            if record.is_valid() {
                debug!(
                    "matched '{food_name}' to provider record {:?} ('{}')",
                    candidate.provider_id, candidate.description
                );
                return FoodResult {
                    name: food_name.to_string(),
                    portion: portion_for(candidate),
                    nutrition: record,
                    nutrition_source: NutritionSource::Measured,
                    image_ref,
                };
            }
        }

        warn!(
            "no usable nutrition data among {} candidates for '{food_name}'; using estimate",
            candidates.len()
        );
        estimated_result(food_name, image_ref)
    }
}

fn estimated_result(food_name: &str, image_ref: Option<String>) -> FoodResult {
    FoodResult {
        name: food_name.to_string(),
        portion: DEFAULT_PORTION.to_string(),
        nutrition: NutritionRecord::generic_estimate(),
        nutrition_source: NutritionSource::Estimated,
        image_ref,
    }
}

fn portion_for(candidate: &FoodCandidate) -> String {
    match (candidate.serving_size, candidate.serving_size_unit.as_deref()) {
        (Some(size), Some(unit)) => format!("{size:.0} {unit}"),
        _ => DEFAULT_PORTION.to_string(),
    }
}

/// Pull the four tracked nutrients out of a heterogeneous nutrient list.
fn extract_record(candidate: &FoodCandidate) -> NutritionRecord {
    let energy = find_nutrient(&candidate.nutrients, NUTRIENT_ID_ENERGY, ALIASES_ENERGY);
    let calories = energy.map(energy_kcal).unwrap_or(0.0);

    let value_of = |id: u32, aliases: &[&str]| {
        find_nutrient(&candidate.nutrients, id, aliases)
            .map(|n| n.amount)
            .unwrap_or(0.0)
    };

    NutritionRecord::new(
        calories,
        value_of(NUTRIENT_ID_PROTEIN, ALIASES_PROTEIN),
        value_of(NUTRIENT_ID_CARBS, ALIASES_CARBS),
        value_of(NUTRIENT_ID_FAT, ALIASES_FAT),
    )
}

/// Prefer the stable numeric id; fall back to case-insensitive substring
/// matching against the alias set. The same nutrient may arrive tagged
/// either way across queries.
fn find_nutrient<'a>(
    nutrients: &'a [FoodNutrient],
    id: u32,
    aliases: &[&str],
) -> Option<&'a FoodNutrient> {
    if let Some(by_id) = nutrients.iter().find(|n| n.nutrient_id == Some(id)) {
        return Some(by_id);
    }

    for alias in aliases {
        let found = nutrients.iter().find(|n| {
            n.name
                .as_deref()
                .map(|name| name.to_lowercase().contains(alias))
                .unwrap_or(false)
        });
        if found.is_some() {
            return found;
        }
    }

    None
}

fn energy_kcal(nutrient: &FoodNutrient) -> f64 {
    match nutrient.unit.as_deref() {
        Some(unit) if unit.eq_ignore_ascii_case("kj") => nutrient.amount / KJ_PER_KCAL,
        _ => nutrient.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeLookup {
        response: Result<Vec<FoodCandidate>, LookupError>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn returning(candidates: Vec<FoodCandidate>) -> Self {
            Self {
                response: Ok(candidates),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: LookupError) -> Self {
            Self {
                response: Err(error),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NutritionLookup for FakeLookup {
        async fn search(
            &self,
            food_name: &str,
            _limit: u32,
        ) -> Result<Vec<FoodCandidate>, LookupError> {
            self.queries.lock().unwrap().push(food_name.to_string());
            match &self.response {
                Ok(candidates) => Ok(candidates.clone()),
                Err(LookupError::Timeout) => Err(LookupError::Timeout),
                Err(LookupError::Http(msg)) => Err(LookupError::Http(msg.clone())),
                Err(LookupError::Decode(msg)) => Err(LookupError::Decode(msg.clone())),
            }
        }
    }

    fn nutrient_by_id(id: u32, amount: f64, unit: &str) -> FoodNutrient {
        FoodNutrient {
            nutrient_id: Some(id),
            name: None,
            amount,
            unit: Some(unit.into()),
        }
    }

    fn nutrient_by_name(name: &str, amount: f64, unit: &str) -> FoodNutrient {
        FoodNutrient {
            nutrient_id: None,
            name: Some(name.into()),
            amount,
            unit: Some(unit.into()),
        }
    }

    fn candidate(description: &str, nutrients: Vec<FoodNutrient>) -> FoodCandidate {
        FoodCandidate {
            provider_id: Some(1),
            description: description.into(),
            serving_size: None,
            serving_size_unit: None,
            nutrients,
        }
    }

    #[tokio::test]
    async fn first_valid_candidate_wins_in_provider_order() {
        let lookup = Arc::new(FakeLookup::returning(vec![
            candidate("Pizza, frozen, empty data", vec![]),
            candidate(
                "Pizza, cheese",
                vec![
                    nutrient_by_id(1008, 266.0, "KCAL"),
                    nutrient_by_id(1003, 11.0, "G"),
                    nutrient_by_id(1005, 33.0, "G"),
                    nutrient_by_id(1004, 10.0, "G"),
                ],
            ),
            candidate("Pizza, pepperoni", vec![nutrient_by_id(1008, 298.0, "KCAL")]),
        ]));

        let reconciler = NutritionReconciler::new(lookup, 5);
        let result = reconciler.resolve("Pizza", None).await;

        assert_eq!(result.nutrition_source, NutritionSource::Measured);
        assert_eq!(result.nutrition.calories, 266.0);
        assert_eq!(result.nutrition.protein_g, 11.0);
        assert_eq!(result.name, "Pizza");
    }

    #[tokio::test]
    async fn selection_is_deterministic_for_the_same_candidate_list() {
        let candidates = vec![
            candidate("A", vec![nutrient_by_id(1008, 100.0, "KCAL")]),
            candidate("B", vec![nutrient_by_id(1008, 200.0, "KCAL")]),
        ];
        let reconciler =
            NutritionReconciler::new(Arc::new(FakeLookup::returning(candidates.clone())), 5);

        let first = reconciler.resolve("toast", None).await;
        let second = reconciler.resolve("toast", None).await;
        assert_eq!(first.nutrition, second.nutrition);
        assert_eq!(first.nutrition.calories, 100.0);
    }

    #[tokio::test]
    async fn name_aliases_match_when_id_is_absent() {
        let lookup = Arc::new(FakeLookup::returning(vec![candidate(
            "Toast, whole wheat",
            vec![
                nutrient_by_name("Energy", 75.0, "KCAL"),
                nutrient_by_name("Protein", 3.0, "G"),
                nutrient_by_name("Carbohydrate, by difference", 13.0, "G"),
                nutrient_by_name("Total lipid (fat)", 1.0, "G"),
            ],
        )]));

        let reconciler = NutritionReconciler::new(lookup, 5);
        let result = reconciler.resolve("toast", None).await;

        assert_eq!(result.nutrition_source, NutritionSource::Measured);
        assert_eq!(result.nutrition.calories, 75.0);
        assert_eq!(result.nutrition.carbs_g, 13.0);
        assert_eq!(result.nutrition.fat_g, 1.0);
    }

    #[tokio::test]
    async fn kilojoule_energy_is_converted() {
        let lookup = Arc::new(FakeLookup::returning(vec![candidate(
            "Rice",
            vec![nutrient_by_name("Energy", 418.4, "kJ")],
        )]));

        let reconciler = NutritionReconciler::new(lookup, 5);
        let result = reconciler.resolve("rice", None).await;
        assert!((result.nutrition.calories - 100.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn no_candidates_falls_back_to_the_fixed_estimate() {
        let reconciler = NutritionReconciler::new(Arc::new(FakeLookup::returning(vec![])), 5);
        let result = reconciler.resolve("xyzfood123", None).await;

        assert!(result.is_estimate());
        assert_eq!(result.nutrition, NutritionRecord::new(200.0, 10.0, 25.0, 8.0));
        assert_eq!(result.portion, "1 serving");
    }

    #[tokio::test]
    async fn lookup_failure_falls_back_to_the_fixed_estimate() {
        let reconciler =
            NutritionReconciler::new(Arc::new(FakeLookup::failing(LookupError::Timeout)), 5);
        let result = reconciler.resolve("pho", Some("photo-17".into())).await;

        assert!(result.is_estimate());
        assert_eq!(result.image_ref.as_deref(), Some("photo-17"));
    }

    #[tokio::test]
    async fn implausible_candidates_are_skipped() {
        let lookup = Arc::new(FakeLookup::returning(vec![
            candidate("Bad data", vec![nutrient_by_id(1008, 99_999.0, "KCAL")]),
            candidate("Good data", vec![nutrient_by_id(1008, 350.0, "KCAL")]),
        ]));

        let reconciler = NutritionReconciler::new(lookup, 5);
        let result = reconciler.resolve("curry", None).await;
        assert_eq!(result.nutrition.calories, 350.0);
    }

    #[tokio::test]
    async fn serving_size_becomes_the_portion_string() {
        let mut with_serving = candidate("Pizza", vec![nutrient_by_id(1008, 266.0, "KCAL")]);
        with_serving.serving_size = Some(107.0);
        with_serving.serving_size_unit = Some("g".into());

        let reconciler =
            NutritionReconciler::new(Arc::new(FakeLookup::returning(vec![with_serving])), 5);
        let result = reconciler.resolve("pizza", None).await;
        assert_eq!(result.portion, "107 g");
    }
}
