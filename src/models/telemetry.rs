//! Gap telemetry data model.
//!
//! A `FallbackLogEntry` is persisted once per escalation and lives until it
//! has been exported and aged past the retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the local result was rejected and the remote analyzer invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    LowConfidence,
    NoPrediction,
    InferenceError,
    EngineNotReady,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::LowConfidence => "LOW_CONFIDENCE",
            FallbackReason::NoPrediction => "NO_PREDICTION",
            FallbackReason::InferenceError => "INFERENCE_ERROR",
            FallbackReason::EngineNotReady => "ENGINE_NOT_READY",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "LOW_CONFIDENCE" => Some(FallbackReason::LowConfidence),
            "NO_PREDICTION" => Some(FallbackReason::NoPrediction),
            "INFERENCE_ERROR" => Some(FallbackReason::InferenceError),
            "ENGINE_NOT_READY" => Some(FallbackReason::EngineNotReady),
            _ => None,
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded local-model gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackLogEntry {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub food_name_from_remote: String,
    pub local_top_label: Option<String>,
    pub local_top_confidence: f32,
    pub reason: FallbackReason,
    pub image_ref: Option<String>,
    pub exported: bool,
}

impl FallbackLogEntry {
    pub fn new(
        food_name_from_remote: impl Into<String>,
        local_top_label: Option<String>,
        local_top_confidence: f32,
        reason: FallbackReason,
        image_ref: Option<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            food_name_from_remote: food_name_from_remote.into(),
            local_top_label,
            local_top_confidence,
            reason,
            image_ref,
            exported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_strings() {
        for reason in [
            FallbackReason::LowConfidence,
            FallbackReason::NoPrediction,
            FallbackReason::InferenceError,
            FallbackReason::EngineNotReady,
        ] {
            assert_eq!(FallbackReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(FallbackReason::from_str("SOMETHING_ELSE"), None);
    }

    #[test]
    fn new_entries_start_unexported() {
        let entry = FallbackLogEntry::new(
            "ramen",
            Some("soup".into()),
            0.31,
            FallbackReason::LowConfidence,
            None,
        );
        assert!(!entry.exported);
        assert!(entry.id.is_none());
    }
}
