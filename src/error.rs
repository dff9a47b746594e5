use thiserror::Error;

use crate::models::FallbackReason;

/// Failures local to the inference engine. All variants except `Init` are
/// recovered by the orchestrator through escalation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to initialize inference engine: {reason}")]
    Init { reason: String },

    #[error("inference engine is not ready (not initialized or already closed)")]
    NotReady,

    #[error("inference failed: {reason}")]
    Inference { reason: String },
}

/// Failures from the nutrition lookup provider. Always recovered by
/// substituting the generic estimate.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("nutrition lookup request failed: {0}")]
    Http(String),

    #[error("nutrition lookup timed out")]
    Timeout,

    #[error("nutrition lookup returned a malformed response: {0}")]
    Decode(String),
}

/// Failures from the remote analyzer. Terminal for a request when the local
/// tier was already rejected.
#[derive(Debug, Error)]
pub enum RemoteAnalyzerError {
    #[error("remote analyzer request failed: {0}")]
    Http(String),

    #[error("remote analyzer timed out")]
    Timeout,

    #[error("remote analyzer returned no usable prediction")]
    NoResult,
}

/// User-visible detection failures. Everything else is recovered inside
/// the pipeline.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detection failed (local: {local}, remote: {remote}); try manual entry")]
    BothTiersFailed {
        local: FallbackReason,
        remote: RemoteAnalyzerError,
    },

    #[error("analysis was cancelled")]
    Cancelled,
}
