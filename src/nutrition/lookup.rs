//! Nutrition lookup client.
//!
//! The provider contract is intentionally loose: candidates arrive in
//! provider order, and each nutrient carries either a stable numeric id or
//! only a free-text name plus a value and unit. The reconciler copes with
//! both taggings.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LookupError;

/// One nutrient value from a candidate record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodNutrient {
    pub nutrient_id: Option<u32>,
    pub name: Option<String>,
    pub amount: f64,
    pub unit: Option<String>,
}

/// One candidate food record from the provider, in provider order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodCandidate {
    pub provider_id: Option<u64>,
    pub description: String,
    pub serving_size: Option<f64>,
    pub serving_size_unit: Option<String>,
    pub nutrients: Vec<FoodNutrient>,
}

/// Capability seam for the external nutrition database.
#[async_trait]
pub trait NutritionLookup: Send + Sync {
    async fn search(
        &self,
        food_name: &str,
        limit: u32,
    ) -> Result<Vec<FoodCandidate>, LookupError>;
}

// ── USDA FoodData Central wire format ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    foods: Vec<SearchFood>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFood {
    fdc_id: Option<u64>,
    description: String,
    serving_size: Option<f64>,
    serving_size_unit: Option<String>,
    #[serde(default)]
    food_nutrients: Vec<SearchNutrient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNutrient {
    nutrient_id: Option<u32>,
    nutrient_name: Option<String>,
    #[serde(default)]
    value: f64,
    unit_name: Option<String>,
}

impl From<SearchFood> for FoodCandidate {
    fn from(food: SearchFood) -> Self {
        FoodCandidate {
            provider_id: food.fdc_id,
            description: food.description,
            serving_size: food.serving_size,
            serving_size_unit: food.serving_size_unit,
            nutrients: food
                .food_nutrients
                .into_iter()
                .map(|n| FoodNutrient {
                    nutrient_id: n.nutrient_id,
                    name: n.nutrient_name,
                    amount: n.value,
                    unit: n.unit_name,
                })
                .collect(),
        }
    }
}

const USDA_BASE_URL: &str = "https://api.nal.usda.gov/fdc";

/// HTTP client against the USDA FoodData Central search endpoint.
pub struct UsdaLookupClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UsdaLookupClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Self::with_base_url(api_key, USDA_BASE_URL, timeout)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LookupError::Http(err.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl NutritionLookup for UsdaLookupClient {
    async fn search(
        &self,
        food_name: &str,
        limit: u32,
    ) -> Result<Vec<FoodCandidate>, LookupError> {
        let url = format!("{}/v1/foods/search", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("query", food_name),
                ("pageSize", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LookupError::Timeout
                } else {
                    LookupError::Http(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Http(format!(
                "lookup returned status {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| LookupError::Decode(err.to_string()))?;

        debug!(
            "nutrition lookup for '{food_name}' returned {} candidates",
            body.foods.len()
        );

        Ok(body.foods.into_iter().map(FoodCandidate::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_maps_to_candidates() {
        let json = r#"{
            "foods": [
                {
                    "fdcId": 171477,
                    "description": "Pizza, cheese",
                    "servingSize": 107.0,
                    "servingSizeUnit": "g",
                    "foodNutrients": [
                        {"nutrientId": 1008, "nutrientName": "Energy", "value": 266.0, "unitName": "KCAL"},
                        {"nutrientName": "Protein", "value": 11.0, "unitName": "G"}
                    ]
                }
            ]
        }"#;

        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let candidates: Vec<FoodCandidate> =
            parsed.foods.into_iter().map(FoodCandidate::from).collect();

        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.provider_id, Some(171477));
        assert_eq!(candidate.nutrients.len(), 2);
        assert_eq!(candidate.nutrients[0].nutrient_id, Some(1008));
        // Second nutrient is tagged by name only.
        assert_eq!(candidate.nutrients[1].nutrient_id, None);
        assert_eq!(candidate.nutrients[1].name.as_deref(), Some("Protein"));
    }

    #[test]
    fn missing_foods_array_yields_empty_list() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.foods.is_empty());
    }
}
