//! Detection data model.
//!
//! A `DetectionResult` is transient: produced by the orchestrator for one
//! photo and consumed immediately by the reconciliation step.

use serde::{Deserialize, Serialize};

/// A single ranked classifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub display_name: String,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        let label = label.into();
        let display_name = display_name_for(&label);
        Self {
            label,
            confidence,
            display_name,
        }
    }
}

/// Turn a raw classifier label ("french_fries") into something presentable
/// ("French Fries").
pub(crate) fn display_name_for(label: &str) -> String {
    label
        .split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which tier produced the winning predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionSource {
    Local,
    Remote,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Local => "local",
            DetectionSource::Remote => "remote",
        }
    }
}

/// The outcome of running the detection pipeline on one image.
///
/// Invariants enforced by [`DetectionResult::from_predictions`]: predictions
/// sorted descending by confidence, truncated to the configured maximum, and
/// `top_confidence` equal to the first prediction's confidence (0.0 when
/// empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub predictions: Vec<Prediction>,
    pub top_confidence: f32,
    pub source: DetectionSource,
    pub escalation_suggested: bool,
    pub escalation_reason: Option<String>,
}

impl DetectionResult {
    pub fn from_predictions(
        mut predictions: Vec<Prediction>,
        source: DetectionSource,
        max_predictions: usize,
    ) -> Self {
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.truncate(max_predictions);

        let top_confidence = predictions.first().map(|p| p.confidence).unwrap_or(0.0);

        Self {
            predictions,
            top_confidence,
            source,
            escalation_suggested: false,
            escalation_reason: None,
        }
    }

    pub fn with_escalation_suggestion(mut self, reason: String) -> Self {
        self.escalation_suggested = true;
        self.escalation_reason = Some(reason);
        self
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}
