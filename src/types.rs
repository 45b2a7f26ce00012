//! Shared error taxonomy for the retrieval engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single model's failure reason, used when aggregating compare-all errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFailure {
    pub model_key: String,
    pub reason: String,
}

impl std::fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.model_key, self.reason)
    }
}

/// Errors surfaced by chunking, indexing, and query execution.
///
/// Per-model failures (`ModelUnavailable`, `CorruptIndex`, `Timeout`,
/// `Embedding`) are always local to one model: the query engine records them
/// in the comparison report instead of aborting sibling models. Only
/// [`RagError::AllModelsFailed`] represents an aggregate failure.
#[derive(Debug, Error)]
pub enum RagError {
    /// An embedding vector's length disagrees with the model's configured
    /// dimension. Fatal to that build, local to one model.
    #[error("dimension mismatch for model '{model}': expected {expected}, got {actual}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    /// A resident store was required but none has been loaded yet.
    #[error("index for model '{model}' is not loaded")]
    IndexNotLoaded { model: String },

    /// No persisted, loadable index exists for the requested model.
    #[error("model '{model}' unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    /// Persisted index files are inconsistent with each other.
    #[error("corrupt index for model '{model}': {reason}")]
    CorruptIndex { model: String, reason: String },

    /// A per-model operation exceeded its time budget.
    #[error("model '{model}' timed out after {elapsed_ms}ms")]
    Timeout { model: String, elapsed_ms: u64 },

    /// Malformed query parameters, rejected before any model is touched.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The embedding provider failed for one model.
    #[error("embedding failed for model '{model}': {reason}")]
    Embedding { model: String, reason: String },

    #[error("chunking failed: {0}")]
    Chunking(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Every model in a compare-all request failed.
    #[error("all models failed: [{}]", format_failures(.0))]
    AllModelsFailed(Vec<ModelFailure>),
}

impl RagError {
    /// Stable machine-readable code for this error, used in per-model
    /// comparison rows so callers do not have to parse messages.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::IndexNotLoaded { .. } => "index_not_loaded",
            RagError::ModelUnavailable { .. } => "model_unavailable",
            RagError::CorruptIndex { .. } => "corrupt_index",
            RagError::Timeout { .. } => "timeout",
            RagError::InvalidRequest(_) => "invalid_request",
            RagError::Embedding { .. } => "embedding",
            RagError::Chunking(_) => "chunking",
            RagError::Storage(_) => "storage",
            RagError::Io(_) => "io",
            RagError::AllModelsFailed(_) => "all_models_failed",
        }
    }
}

fn format_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(ModelFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
