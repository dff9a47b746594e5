//! End-to-end photo analysis: detection, nutrition reconciliation, and the
//! telemetry maintenance entry points, behind one facade.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::db::Database;
use crate::detection::{DetectionOrchestrator, RemoteAnalyzer};
use crate::engine::FoodClassifier;
use crate::error::DetectionError;
use crate::models::{DetectionResult, FoodResult};
use crate::nutrition::{NutritionLookup, NutritionReconciler};
use crate::telemetry::GapTelemetry;

/// The full answer for one photo: what was detected and what it is worth
/// nutritionally.
#[derive(Debug, Clone, Serialize)]
pub struct MealAnalysis {
    pub detection: DetectionResult,
    pub food: FoodResult,
}

pub struct FoodPipeline {
    orchestrator: DetectionOrchestrator,
    reconciler: NutritionReconciler,
    telemetry: Arc<GapTelemetry>,
    config: PipelineConfig,
}

impl FoodPipeline {
    pub fn new(
        classifier: Arc<dyn FoodClassifier>,
        remote: Arc<dyn RemoteAnalyzer>,
        lookup: Arc<dyn NutritionLookup>,
        db: Database,
        config: PipelineConfig,
    ) -> Self {
        let telemetry = Arc::new(GapTelemetry::new(db));
        let orchestrator = DetectionOrchestrator::new(
            classifier,
            remote,
            telemetry.clone(),
            config.clone(),
        );
        let reconciler = NutritionReconciler::new(lookup, config.lookup_candidate_limit);

        Self {
            orchestrator,
            reconciler,
            telemetry,
            config,
        }
    }

    /// Analyze one photo end to end. Nutrition resolution is infallible,
    /// so the only failure mode is a detection double failure.
    pub async fn analyze_photo(
        &self,
        image: &[u8],
        image_ref: Option<&str>,
    ) -> Result<MealAnalysis, DetectionError> {
        let detection = self.orchestrator.detect(image, image_ref).await?;

        let food_name = detection
            .top()
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| "Unknown Food".to_string());

        info!(
            "detected '{food_name}' via {} tier ({:.2} confidence)",
            detection.source.as_str(),
            detection.top_confidence
        );

        let food = self
            .reconciler
            .resolve(&food_name, image_ref.map(str::to_string))
            .await;

        Ok(MealAnalysis { detection, food })
    }

    /// Same as [`analyze_photo`](Self::analyze_photo), but abandons the
    /// request when `cancel` fires, for callers that let the user dismiss
    /// an in-flight analysis.
    pub async fn analyze_photo_cancellable(
        &self,
        image: &[u8],
        image_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MealAnalysis, DetectionError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("photo analysis cancelled");
                Err(DetectionError::Cancelled)
            }
            result = self.analyze_photo(image, image_ref) => result,
        }
    }

    pub fn telemetry(&self) -> &GapTelemetry {
        &self.telemetry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Purge exported telemetry past the configured retention window.
    pub async fn run_retention_purge(&self) -> Result<usize> {
        let deleted = self
            .telemetry
            .purge_expired(self.config.telemetry_retention_days)
            .await?;
        if deleted > 0 {
            info!("retention purge removed {deleted} telemetry entries");
        }
        Ok(deleted)
    }
}
