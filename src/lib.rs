//! FoodLens: hybrid on-device/remote food recognition with nutrition
//! reconciliation.
//!
//! A photo first goes through the local ONNX classifier. Confident results
//! are used directly; low-confidence or failed classifications escalate to a
//! remote analyzer, and every escalation is recorded as gap telemetry so the
//! foods the local model misses can drive retraining. The winning food name
//! is then resolved against a nutrition provider, falling back to a fixed
//! generic estimate when no plausible data comes back.
//!
//! [`pipeline::FoodPipeline`] wires the tiers together; the seams
//! ([`engine::FoodClassifier`], [`detection::RemoteAnalyzer`],
//! [`nutrition::NutritionLookup`]) are traits so callers can substitute
//! their own backends.

pub mod config;
pub mod db;
pub mod detection;
pub mod engine;
pub mod error;
pub mod models;
pub mod nutrition;
pub mod pipeline;
pub mod telemetry;

pub use config::{ConfigStore, EngineSettings, PipelineConfig, PixelNormalization};
pub use db::Database;
pub use detection::{DetectionOrchestrator, HttpRemoteAnalyzer, RemoteAnalyzer};
pub use engine::{FoodClassifier, LocalInferenceEngine};
pub use error::{DetectionError, EngineError, LookupError, RemoteAnalyzerError};
pub use models::{
    DetectionResult, DetectionSource, FallbackLogEntry, FallbackReason, FoodResult,
    NutritionRecord, NutritionSource, Prediction,
};
pub use nutrition::{NutritionLookup, NutritionReconciler, UsdaLookupClient};
pub use pipeline::{FoodPipeline, MealAnalysis};
pub use telemetry::{ExportBatch, GapTelemetry, TelemetrySummary};

/// Initialize logging (reads RUST_LOG env var). Call once at startup.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
