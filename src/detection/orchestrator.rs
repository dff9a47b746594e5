//! Fallback decision orchestrator.
//!
//! Runs the local classifier, gates on the configured confidence
//! thresholds, and escalates to the remote analyzer when the local result
//! is rejected or absent. Every escalation is recorded as gap telemetry,
//! best-effort.

use std::sync::Arc;

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::detection::remote::RemoteAnalyzer;
use crate::engine::FoodClassifier;
use crate::error::{DetectionError, EngineError};
use crate::models::{
    DetectionResult, DetectionSource, FallbackLogEntry, FallbackReason, Prediction,
};
use crate::telemetry::GapTelemetry;

pub struct DetectionOrchestrator {
    classifier: Arc<dyn FoodClassifier>,
    remote: Arc<dyn RemoteAnalyzer>,
    telemetry: Arc<GapTelemetry>,
    config: PipelineConfig,
}

impl DetectionOrchestrator {
    pub fn new(
        classifier: Arc<dyn FoodClassifier>,
        remote: Arc<dyn RemoteAnalyzer>,
        telemetry: Arc<GapTelemetry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            classifier,
            remote,
            telemetry,
            config,
        }
    }

    /// Detect the food in one image.
    ///
    /// Decision tree, with both thresholds inclusive to the upper branch:
    /// - top confidence >= high: accept the local result
    /// - medium <= top confidence < high: accept, but suggest escalation
    /// - otherwise (or on empty/failed local inference): escalate
    ///
    /// Only a double failure (local unusable AND remote failed) surfaces as
    /// an error.
    pub async fn detect(
        &self,
        image: &[u8],
        image_ref: Option<&str>,
    ) -> Result<DetectionResult, DetectionError> {
        if !self.classifier.is_ready() {
            return self
                .escalate(image, image_ref, FallbackReason::EngineNotReady, None)
                .await;
        }

        let local = match self.classifier.classify(image).await {
            Ok(predictions) => predictions,
            Err(EngineError::NotReady) => {
                return self
                    .escalate(image, image_ref, FallbackReason::EngineNotReady, None)
                    .await;
            }
            Err(err) => {
                warn!("local inference failed: {err}; escalating");
                return self
                    .escalate(image, image_ref, FallbackReason::InferenceError, None)
                    .await;
            }
        };

        if local.is_empty() {
            return self
                .escalate(image, image_ref, FallbackReason::NoPrediction, None)
                .await;
        }

        let result = DetectionResult::from_predictions(
            local,
            DetectionSource::Local,
            self.config.max_predictions,
        );
        let top_confidence = result.top_confidence;

        if top_confidence >= self.config.high_confidence_threshold {
            return Ok(result);
        }

        if top_confidence >= self.config.medium_confidence_threshold {
            // Policy choice: the medium tier only suggests; the caller may
            // escalate, the orchestrator never does automatically.
            let reason = format!(
                "Local confidence {:.0}% is below the {:.0}% cutoff; remote analysis may be more accurate",
                top_confidence * 100.0,
                self.config.high_confidence_threshold * 100.0
            );
            return Ok(result.with_escalation_suggestion(reason));
        }

        let local_top = result.top().cloned();
        self.escalate(image, image_ref, FallbackReason::LowConfidence, local_top)
            .await
    }

    async fn escalate(
        &self,
        image: &[u8],
        image_ref: Option<&str>,
        reason: FallbackReason,
        local_top: Option<Prediction>,
    ) -> Result<DetectionResult, DetectionError> {
        info!("escalating to remote analyzer: {reason}");

        match self.remote.analyze(image).await {
            Ok(predictions) => {
                let result = DetectionResult::from_predictions(
                    predictions,
                    DetectionSource::Remote,
                    self.config.max_predictions,
                );
                let food_name = result
                    .top()
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| "unknown".to_string());

                self.record_gap(food_name, reason, local_top, image_ref)
                    .await;
                Ok(result)
            }
            Err(remote_err) => {
                warn!("remote analyzer failed after {reason} escalation: {remote_err}");
                self.record_gap("unknown".to_string(), reason, local_top, image_ref)
                    .await;
                Err(DetectionError::BothTiersFailed {
                    local: reason,
                    remote: remote_err,
                })
            }
        }
    }

    /// Exactly one telemetry insert per escalation. The write is
    /// best-effort; `GapTelemetry::record` never propagates failures.
    async fn record_gap(
        &self,
        food_name: String,
        reason: FallbackReason,
        local_top: Option<Prediction>,
        image_ref: Option<&str>,
    ) {
        let entry = FallbackLogEntry::new(
            food_name,
            local_top.as_ref().map(|p| p.label.clone()),
            local_top.map(|p| p.confidence).unwrap_or(0.0),
            reason,
            image_ref.map(str::to_string),
        );
        self.telemetry.record(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::RemoteAnalyzerError;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClassifier {
        ready: bool,
        outcome: Result<Vec<Prediction>, EngineError>,
    }

    impl FakeClassifier {
        fn returning(predictions: Vec<Prediction>) -> Self {
            Self {
                ready: true,
                outcome: Ok(predictions),
            }
        }

        fn not_ready() -> Self {
            Self {
                ready: false,
                outcome: Err(EngineError::NotReady),
            }
        }

        fn failing() -> Self {
            Self {
                ready: true,
                outcome: Err(EngineError::Inference {
                    reason: "tensor blew up".into(),
                }),
            }
        }
    }

    #[async_trait]
    impl FoodClassifier for FakeClassifier {
        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn classify(&self, _image: &[u8]) -> Result<Vec<Prediction>, EngineError> {
            match &self.outcome {
                Ok(predictions) => Ok(predictions.clone()),
                Err(EngineError::NotReady) => Err(EngineError::NotReady),
                Err(EngineError::Inference { reason }) => Err(EngineError::Inference {
                    reason: reason.clone(),
                }),
                Err(EngineError::Init { reason }) => Err(EngineError::Init {
                    reason: reason.clone(),
                }),
            }
        }
    }

    struct FakeRemote {
        outcome: Result<Vec<Prediction>, ()>,
        calls: AtomicUsize,
    }

    impl FakeRemote {
        fn returning(predictions: Vec<Prediction>) -> Self {
            Self {
                outcome: Ok(predictions),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                outcome: Err(()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteAnalyzer for FakeRemote {
        async fn analyze(&self, _image: &[u8]) -> Result<Vec<Prediction>, RemoteAnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(predictions) => Ok(predictions.clone()),
                Err(()) => Err(RemoteAnalyzerError::Timeout),
            }
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        remote: Arc<FakeRemote>,
        telemetry: Arc<GapTelemetry>,
        orchestrator: DetectionOrchestrator,
    }

    fn harness(classifier: FakeClassifier, remote: FakeRemote) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("telemetry.sqlite3")).unwrap();
        let telemetry = Arc::new(GapTelemetry::new(db));
        let remote = Arc::new(remote);

        let orchestrator = DetectionOrchestrator::new(
            Arc::new(classifier),
            remote.clone(),
            telemetry.clone(),
            PipelineConfig::default(),
        );

        Harness {
            _dir: dir,
            remote,
            telemetry,
            orchestrator,
        }
    }

    async fn telemetry_total(telemetry: &GapTelemetry) -> u64 {
        telemetry
            .summarize(Utc::now() - Duration::hours(1))
            .await
            .unwrap()
            .total_count
    }

    #[tokio::test]
    async fn high_confidence_accepts_locally_without_telemetry() {
        let h = harness(
            FakeClassifier::returning(vec![Prediction::new("pizza", 0.85)]),
            FakeRemote::returning(vec![Prediction::new("burger", 0.9)]),
        );

        let result = h.orchestrator.detect(b"img", None).await.unwrap();
        assert_eq!(result.source, DetectionSource::Local);
        assert_eq!(result.top().unwrap().label, "pizza");
        assert!(!result.escalation_suggested);
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(telemetry_total(&h.telemetry).await, 0);
    }

    #[tokio::test]
    async fn medium_confidence_suggests_but_does_not_escalate() {
        let h = harness(
            FakeClassifier::returning(vec![Prediction::new("toast", 0.55)]),
            FakeRemote::returning(vec![Prediction::new("bagel", 0.9)]),
        );

        let result = h.orchestrator.detect(b"img", None).await.unwrap();
        assert_eq!(result.source, DetectionSource::Local);
        assert!(result.escalation_suggested);
        assert!(result.escalation_reason.as_deref().unwrap().contains("55%"));
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(telemetry_total(&h.telemetry).await, 0);
    }

    #[tokio::test]
    async fn threshold_boundaries_belong_to_the_upper_branch() {
        let at_high = harness(
            FakeClassifier::returning(vec![Prediction::new("pizza", 0.7)]),
            FakeRemote::returning(vec![]),
        );
        let result = at_high.orchestrator.detect(b"img", None).await.unwrap();
        assert!(!result.escalation_suggested);
        assert_eq!(at_high.remote.call_count(), 0);

        let at_medium = harness(
            FakeClassifier::returning(vec![Prediction::new("pizza", 0.4)]),
            FakeRemote::returning(vec![]),
        );
        let result = at_medium.orchestrator.detect(b"img", None).await.unwrap();
        assert!(result.escalation_suggested);
        assert_eq!(result.source, DetectionSource::Local);
        assert_eq!(at_medium.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn low_confidence_escalates_and_records_the_gap() {
        let h = harness(
            FakeClassifier::returning(vec![Prediction::new("toast", 0.3)]),
            FakeRemote::returning(vec![Prediction::new("croissant", 0.92)]),
        );

        let result = h.orchestrator.detect(b"img", Some("photo-3")).await.unwrap();
        assert_eq!(result.source, DetectionSource::Remote);
        assert_eq!(result.top().unwrap().label, "croissant");
        assert_eq!(h.remote.call_count(), 1);

        let summary = h
            .telemetry
            .summarize(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(summary.total_count, 1);
        assert_eq!(
            summary.per_reason_counts[0],
            (FallbackReason::LowConfidence, 1)
        );
        assert_eq!(summary.per_food_counts[0].0, "Croissant");
    }

    #[tokio::test]
    async fn empty_local_result_escalates_with_no_prediction() {
        let h = harness(
            FakeClassifier::returning(vec![]),
            FakeRemote::returning(vec![Prediction::new("ramen", 0.88)]),
        );

        let result = h.orchestrator.detect(b"img", None).await.unwrap();
        assert_eq!(result.source, DetectionSource::Remote);
        assert_eq!(h.remote.call_count(), 1);

        let summary = h
            .telemetry
            .summarize(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            summary.per_reason_counts[0],
            (FallbackReason::NoPrediction, 1)
        );
    }

    #[tokio::test]
    async fn inference_error_escalates() {
        let h = harness(
            FakeClassifier::failing(),
            FakeRemote::returning(vec![Prediction::new("ramen", 0.88)]),
        );

        let result = h.orchestrator.detect(b"img", None).await.unwrap();
        assert_eq!(result.source, DetectionSource::Remote);

        let summary = h
            .telemetry
            .summarize(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            summary.per_reason_counts[0],
            (FallbackReason::InferenceError, 1)
        );
    }

    #[tokio::test]
    async fn unready_engine_escalates_without_classifying() {
        let h = harness(
            FakeClassifier::not_ready(),
            FakeRemote::returning(vec![Prediction::new("ramen", 0.88)]),
        );

        let result = h.orchestrator.detect(b"img", None).await.unwrap();
        assert_eq!(result.source, DetectionSource::Remote);

        let summary = h
            .telemetry
            .summarize(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            summary.per_reason_counts[0],
            (FallbackReason::EngineNotReady, 1)
        );
    }

    #[tokio::test]
    async fn double_failure_is_terminal_but_still_recorded() {
        let h = harness(
            FakeClassifier::returning(vec![Prediction::new("toast", 0.2)]),
            FakeRemote::failing(),
        );

        let err = h.orchestrator.detect(b"img", None).await.unwrap_err();
        assert!(matches!(
            err,
            DetectionError::BothTiersFailed {
                local: FallbackReason::LowConfidence,
                ..
            }
        ));
        assert_eq!(telemetry_total(&h.telemetry).await, 1);
    }
}
