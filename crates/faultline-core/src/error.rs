use thiserror::Error;

use crate::models::{ArtifactKind, CodeVersion};

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required input could not be loaded from the store or built.
    #[error("artifact {kind}/{version} missing: {reason}")]
    ArtifactMissing {
        kind: ArtifactKind,
        version: CodeVersion,
        reason: String,
    },

    /// A transient model-service failure outlived the retry budget.
    #[error("model service unavailable after {attempts} attempt(s): {last_error}")]
    ModelUnavailable { attempts: u32, last_error: String },

    /// The model service refused the request (non-retryable 4xx).
    #[error("model service rejected request ({status}): {body}")]
    ModelRejected { status: u16, body: String },

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn aggregation<E: std::fmt::Display>(e: E) -> Self {
        Self::Aggregation(e.to_string())
    }

    pub fn store<E: std::fmt::Display>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    pub fn artifact_missing<E: std::fmt::Display>(
        kind: ArtifactKind,
        version: CodeVersion,
        reason: E,
    ) -> Self {
        Self::ArtifactMissing {
            kind,
            version,
            reason: reason.to_string(),
        }
    }

    /// Stable name of the error kind, used in logs and exit diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ArtifactMissing { .. } => "ArtifactMissingError",
            PipelineError::ModelUnavailable { .. } => "ModelUnavailableError",
            PipelineError::ModelRejected { .. } => "ModelRejectedError",
            PipelineError::Aggregation(_) => "AggregationError",
            PipelineError::Store(_) => "StoreError",
            PipelineError::Io(_) => "IoError",
            PipelineError::Json(_) => "JsonError",
        }
    }

    /// Whether a retry of the same model call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::ModelUnavailable { .. })
    }
}
