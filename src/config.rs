use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

/// Pixel value range the deployed model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelNormalization {
    /// Scale to [-1, 1] (MobileNet-family convention).
    MinusOneToOne,
    /// Scale to [0, 1].
    ZeroToOne,
}

/// Tunable thresholds and limits for the detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// At or above this confidence the local result is accepted outright.
    pub high_confidence_threshold: f32,
    /// At or above this confidence (but below high) the local result is
    /// accepted with an escalation suggestion.
    pub medium_confidence_threshold: f32,
    /// Maximum predictions kept per detection.
    pub max_predictions: usize,
    /// Predictions below this score are discarded before ranking.
    pub min_confidence_floor: f32,
    /// Exported telemetry entries older than this many days are purgeable.
    pub telemetry_retention_days: i64,
    /// How many lookup candidates to request from the nutrition provider.
    pub lookup_candidate_limit: u32,
    /// Timeout applied to remote analyzer and nutrition lookup calls.
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.7,
            medium_confidence_threshold: 0.4,
            max_predictions: 5,
            min_confidence_floor: 0.1,
            telemetry_retention_days: 30,
            lookup_candidate_limit: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Model resources and input contract for the local inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub normalization: PixelNormalization,
}

impl EngineSettings {
    pub fn new(model_path: PathBuf, labels_path: PathBuf) -> Self {
        Self {
            model_path,
            labels_path,
            input_width: 224,
            input_height: 224,
            normalization: PixelNormalization::MinusOneToOne,
        }
    }
}

/// JSON-backed store for the pipeline configuration.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<PipelineConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            PipelineConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> PipelineConfig {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, config: PipelineConfig) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = config;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &PipelineConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: PipelineConfig = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_knobs() {
        let config = PipelineConfig::default();
        assert_eq!(config.high_confidence_threshold, 0.7);
        assert_eq!(config.medium_confidence_threshold, 0.4);
        assert_eq!(config.max_predictions, 5);
        assert_eq!(config.min_confidence_floor, 0.1);
        assert_eq!(config.telemetry_retention_days, 30);
        assert_eq!(config.lookup_candidate_limit, 5);
    }

    #[test]
    fn store_round_trips_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::new(path.clone()).unwrap();
        let mut config = store.current();
        config.high_confidence_threshold = 0.8;
        store.update(config).unwrap();

        let reopened = ConfigStore::new(path).unwrap();
        assert_eq!(reopened.current().high_confidence_threshold, 0.8);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("absent.json")).unwrap();
        assert_eq!(store.current().max_predictions, 5);
    }
}
