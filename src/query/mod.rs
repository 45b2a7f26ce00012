//! Query execution: single-model retrieval and the compare-all protocol.
//!
//! Compare-all is a scatter/gather over independent per-model tasks. Each
//! task owns its error boundary and its timeout, so one slow or broken model
//! never blocks or cancels a sibling; the gather step folds every outcome
//! into the comparison report. Partial results are always returned when at
//! least one model succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::EmbeddingProvider;
use crate::registry::ModelRegistry;
use crate::types::{ModelFailure, RagError};

/// Default per-model time budget covering embed + search.
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(30);

/// A retrieval request as received from the HTTP/CLI adapters.
///
/// Exactly one of `model` / `compareAll` must be set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub compare_all: bool,
}

fn default_limit() -> usize {
    10
}

impl QueryRequest {
    pub fn single(query: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            min_similarity: 0.0,
            model: Some(model.into()),
            compare_all: false,
        }
    }

    pub fn compare_all(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            min_similarity: 0.0,
            model: None,
            compare_all: true,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Rejects malformed parameters before any model is touched.
    pub fn validate(&self) -> Result<(), RagError> {
        match (self.model.as_ref(), self.compare_all) {
            (Some(_), true) => {
                return Err(RagError::InvalidRequest(
                    "set either 'model' or 'compareAll', not both".to_string(),
                ));
            }
            (None, false) => {
                return Err(RagError::InvalidRequest(
                    "one of 'model' or 'compareAll' is required".to_string(),
                ));
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(RagError::InvalidRequest(format!(
                "minSimilarity must be within [0, 1], got {}",
                self.min_similarity
            )));
        }
        if self.limit == 0 {
            return Err(RagError::InvalidRequest("limit must be positive".into()));
        }
        if self.query.trim().is_empty() {
            return Err(RagError::InvalidRequest("query must not be empty".into()));
        }
        Ok(())
    }
}

/// One retrieved chunk with its similarity score.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub text: String,
    pub section_path: Vec<String>,
    pub token_count: usize,
    pub score: f32,
}

/// Result of a single-model query.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub model: String,
    pub results: Vec<ScoredChunk>,
    pub duration_ms: u64,
    /// Token count summed over the returned chunks.
    pub total_tokens: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOutcome {
    Success,
    Failed,
}

/// One row of the compare-all report.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub model_key: String,
    pub status: ModelOutcome,
    /// Machine-readable failure code (`timeout`, `model_unavailable`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub result_count: usize,
    /// Mean of returned scores; 0 when the model returned nothing.
    pub avg_similarity: f32,
    pub total_tokens: usize,
    pub duration_ms: u64,
}

/// Aggregate compare-all output: one row per model plus the raw result sets
/// for the successes. No cross-model ranking is computed here; that is a
/// presentation concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResponse {
    pub comparison: Vec<ComparisonRow>,
    pub per_model: BTreeMap<String, Vec<ScoredChunk>>,
}

/// Either response shape, for adapters that dispatch on the request.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Single(QueryResponse),
    Comparison(ComparisonResponse),
}

/// Executes queries against the registry's index stores.
///
/// Holds only shared handles; cloning is cheap and the engine itself is
/// stateless across requests.
#[derive(Clone)]
pub struct QueryEngine {
    registry: Arc<ModelRegistry>,
    provider: Arc<dyn EmbeddingProvider>,
    model_timeout: Duration,
}

impl QueryEngine {
    pub fn new(registry: Arc<ModelRegistry>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            registry,
            provider,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    /// Per-model time budget covering embed + search. A model exceeding it is
    /// reported as failed with a timeout reason, never retried within the
    /// request.
    #[must_use]
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Validates and dispatches a request to the single-model or compare-all
    /// path.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryOutput, RagError> {
        request.validate()?;
        if let Some(model) = request.model.as_deref() {
            self.query_model(model, &request.query, request.limit, request.min_similarity)
                .await
                .map(QueryOutput::Single)
        } else {
            self.compare_all(&request.query, request.limit, request.min_similarity)
                .await
                .map(QueryOutput::Comparison)
        }
    }

    /// Single-model retrieval with the per-model timeout applied.
    pub async fn query_model(
        &self,
        model_key: &str,
        query: &str,
        limit: usize,
        min_similarity: f32,
    ) -> Result<QueryResponse, RagError> {
        run_model(
            Arc::clone(&self.registry),
            Arc::clone(&self.provider),
            model_key.to_string(),
            query.to_string(),
            limit,
            min_similarity,
            self.model_timeout,
        )
        .await
    }

    /// Runs the query against every available model concurrently and folds
    /// the outcomes into a comparison report.
    ///
    /// Fails only when no model can produce results: either nothing is
    /// available (every configured model reported as `model_unavailable`) or
    /// every fan-out task failed.
    pub async fn compare_all(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f32,
    ) -> Result<ComparisonResponse, RagError> {
        let available = self.registry.list_available();
        if available.is_empty() {
            let failures = self
                .registry
                .configured_models()
                .into_iter()
                .map(|model_key| ModelFailure {
                    reason: RagError::ModelUnavailable {
                        model: model_key.clone(),
                        reason: "no persisted index".to_string(),
                    }
                    .to_string(),
                    model_key,
                })
                .collect();
            return Err(RagError::AllModelsFailed(failures));
        }

        tracing::debug!(models = available.len(), "compare-all fan-out");

        let tasks: Vec<_> = available
            .iter()
            .map(|model_key| {
                let work = run_model(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.provider),
                    model_key.clone(),
                    query.to_string(),
                    limit,
                    min_similarity,
                    self.model_timeout,
                );
                tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = work.await;
                    (outcome, started.elapsed().as_millis() as u64)
                })
            })
            .collect();

        let joined = join_all(tasks).await;

        let mut comparison = Vec::with_capacity(available.len());
        let mut per_model = BTreeMap::new();
        let mut failures = Vec::new();

        for (model_key, joined) in available.into_iter().zip(joined) {
            let (outcome, duration_ms) = joined.unwrap_or_else(|err| {
                (
                    Err(RagError::Storage(format!("model task panicked: {err}"))),
                    0,
                )
            });
            match outcome {
                Ok(response) => {
                    comparison.push(success_row(&response));
                    per_model.insert(model_key, response.results);
                }
                Err(err) => {
                    failures.push(ModelFailure {
                        model_key: model_key.clone(),
                        reason: err.to_string(),
                    });
                    comparison.push(failure_row(model_key, &err, duration_ms));
                }
            }
        }

        if per_model.is_empty() {
            return Err(RagError::AllModelsFailed(failures));
        }

        Ok(ComparisonResponse {
            comparison,
            per_model,
        })
    }
}

fn success_row(response: &QueryResponse) -> ComparisonRow {
    let avg_similarity = if response.results.is_empty() {
        0.0
    } else {
        response.results.iter().map(|r| r.score).sum::<f32>() / response.results.len() as f32
    };
    ComparisonRow {
        model_key: response.model.clone(),
        status: ModelOutcome::Success,
        reason_code: None,
        reason: None,
        result_count: response.results.len(),
        avg_similarity,
        total_tokens: response.total_tokens,
        duration_ms: response.duration_ms,
    }
}

/// `duration_ms` is the measured wall time of the failed attempt, covering
/// load, embed, and search up to the point of failure.
fn failure_row(model_key: String, err: &RagError, duration_ms: u64) -> ComparisonRow {
    ComparisonRow {
        model_key,
        status: ModelOutcome::Failed,
        reason_code: Some(err.code().to_string()),
        reason: Some(err.to_string()),
        result_count: 0,
        avg_similarity: 0.0,
        total_tokens: 0,
        duration_ms,
    }
}

/// One model's embed + search path, wrapped in its own timeout. Standalone so
/// the fan-out can move it into a spawned task.
async fn run_model(
    registry: Arc<ModelRegistry>,
    provider: Arc<dyn EmbeddingProvider>,
    model_key: String,
    query: String,
    limit: usize,
    min_similarity: f32,
    budget: Duration,
) -> Result<QueryResponse, RagError> {
    let started = Instant::now();
    let work = async {
        let store = registry.ensure_ready(&model_key).await?;
        let vector = provider.embed(&query, &model_key).await?;
        store.search_chunks(&vector, limit, min_similarity)
    };

    let hits = match tokio::time::timeout(budget, work).await {
        Ok(result) => result?,
        Err(_) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            return Err(RagError::Timeout {
                model: model_key,
                elapsed_ms,
            });
        }
    };

    let results: Vec<ScoredChunk> = hits
        .into_iter()
        .map(|(chunk, score)| ScoredChunk {
            chunk_id: chunk.id,
            text: chunk.text,
            section_path: chunk.section_path,
            token_count: chunk.token_count,
            score,
        })
        .collect();
    let total_tokens = results.iter().map(|r| r.token_count).sum();

    Ok(QueryResponse {
        model: model_key,
        results,
        duration_ms: started.elapsed().as_millis() as u64,
        total_tokens,
    })
}
