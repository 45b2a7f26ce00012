//! Offline index construction: chunks → batched embeddings → build → persist.
//!
//! Building is a batch operation run one model at a time (embedding is the
//! expensive step and models contend for the same accelerator). Progress is
//! surfaced per batch through an optional callback with an elapsed/ETA
//! estimate so long runs are observably alive; the query path never needs
//! any of this.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chunking::Chunk;
use crate::embeddings::EmbeddingProvider;
use crate::registry::ModelRegistry;
use crate::stores::{IndexStore, ModelConfig};
use crate::types::RagError;

const DEFAULT_BATCH_SIZE: usize = 32;

/// Snapshot of a build in flight, passed to the progress callback after each
/// embedded batch.
#[derive(Clone, Debug)]
pub struct BuildProgress {
    pub model_key: String,
    /// 1-based batch counter.
    pub batch: usize,
    pub total_batches: usize,
    pub chunks_embedded: usize,
    pub total_chunks: usize,
    pub elapsed: Duration,
    /// Remaining-time estimate extrapolated from throughput so far. `None`
    /// until the first batch completes.
    pub eta: Option<Duration>,
}

pub type ProgressFn = Arc<dyn Fn(&BuildProgress) + Send + Sync>;

/// Builds per-model index stores from chunked documents.
///
/// # Examples
///
/// ```rust,ignore
/// let builder = IndexBuilder::new(provider).with_batch_size(64);
/// let store = builder
///     .build_and_persist(config, chunks, registry.model_dir("small"))
///     .await?;
/// ```
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    progress: Option<ProgressFn>,
}

impl IndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Register a progress callback invoked after every embedded batch.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Embeds `chunks` with the configured provider and builds the model's
    /// index store in memory.
    ///
    /// Vector lengths are validated against `config.dimension`; a mismatch
    /// fails the whole build with [`RagError::DimensionMismatch`].
    pub async fn build(
        &self,
        config: ModelConfig,
        chunks: Vec<Chunk>,
    ) -> Result<IndexStore, RagError> {
        let started = Instant::now();
        let total_chunks = chunks.len();
        let total_batches = total_chunks.div_ceil(self.batch_size).max(1);

        tracing::info!(
            model = %config.model_key,
            chunks = total_chunks,
            batches = total_batches,
            "starting index build"
        );

        let mut records: Vec<(Chunk, Vec<f32>)> = Vec::with_capacity(total_chunks);

        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .provider
                .embed_batch(&texts, &config.model_key)
                .await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding {
                    model: config.model_key.clone(),
                    reason: format!(
                        "provider returned {} vectors for a batch of {}",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }
            for (chunk, vector) in batch.iter().cloned().zip(vectors) {
                if vector.len() != config.dimension {
                    return Err(RagError::DimensionMismatch {
                        model: config.model_key.clone(),
                        expected: config.dimension,
                        actual: vector.len(),
                    });
                }
                records.push((chunk, vector));
            }

            self.report(
                &config.model_key,
                batch_index + 1,
                total_batches,
                records.len(),
                total_chunks,
                started,
            );
        }

        IndexStore::build(config, records)
    }

    /// [`build`](Self::build) followed by [`IndexStore::persist`] into `dir`.
    pub async fn build_and_persist(
        &self,
        config: ModelConfig,
        chunks: Vec<Chunk>,
        dir: impl AsRef<std::path::Path>,
    ) -> Result<IndexStore, RagError> {
        let store = self.build(config, chunks).await?;
        store.persist(dir).await?;
        Ok(store)
    }

    /// Builds, persists into the registry's layout, and marks the model
    /// `Ready` so it is queryable without a reload.
    pub async fn build_into_registry(
        &self,
        registry: &ModelRegistry,
        config: ModelConfig,
        chunks: Vec<Chunk>,
    ) -> Result<Arc<IndexStore>, RagError> {
        let dir = registry.model_dir(&config.model_key);
        let store = self.build_and_persist(config, chunks, dir).await?;
        registry.insert_ready(store)
    }

    fn report(
        &self,
        model_key: &str,
        batch: usize,
        total_batches: usize,
        chunks_embedded: usize,
        total_chunks: usize,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        let eta = if chunks_embedded > 0 && chunks_embedded < total_chunks {
            let per_chunk = elapsed.as_secs_f64() / chunks_embedded as f64;
            let remaining = (total_chunks - chunks_embedded) as f64 * per_chunk;
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        };

        tracing::debug!(
            model = %model_key,
            batch,
            total_batches,
            chunks_embedded,
            total_chunks,
            "embedded batch"
        );

        if let Some(progress) = &self.progress {
            progress(&BuildProgress {
                model_key: model_key.to_string(),
                batch,
                total_batches,
                chunks_embedded,
                total_chunks,
                elapsed,
                eta,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunker, ChunkingConfig, SourceDocument};
    use crate::embeddings::MockEmbeddingProvider;
    use parking_lot::Mutex;

    fn sample_chunks(n: usize) -> Vec<Chunk> {
        let text: String = (0..n)
            .map(|i| format!("# Section {i}\n\nParagraph about topic number {i}.\n\n"))
            .collect();
        Chunker::new(ChunkingConfig {
            merge_peers: false,
            ..Default::default()
        })
        .chunk(&SourceDocument::new("sample", text))
    }

    #[tokio::test]
    async fn build_reports_progress_per_batch() {
        let provider = Arc::new(MockEmbeddingProvider::new().with_model("m", 16));
        let seen: Arc<Mutex<Vec<BuildProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let builder = IndexBuilder::new(provider)
            .with_batch_size(2)
            .with_progress(Arc::new(move |p: &BuildProgress| {
                sink.lock().push(p.clone());
            }));

        let chunks = sample_chunks(5);
        let store = builder
            .build(ModelConfig::new("m", 16), chunks.clone())
            .await
            .unwrap();

        assert_eq!(store.len(), chunks.len());
        let progress = seen.lock();
        assert_eq!(progress.len(), 3); // 5 chunks, batches of 2
        assert_eq!(progress.last().unwrap().chunks_embedded, chunks.len());
        assert!(progress[0].eta.is_some());
        assert!(progress.last().unwrap().eta.is_none());
    }

    #[tokio::test]
    async fn build_rejects_wrong_dimension_from_provider() {
        // Provider configured for 16 dims while the model declares 32.
        let provider = Arc::new(MockEmbeddingProvider::new().with_model("m", 16));
        let builder = IndexBuilder::new(provider);
        let err = builder
            .build(ModelConfig::new("m", 32), sample_chunks(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_corpus_builds_empty_store() {
        let provider = Arc::new(MockEmbeddingProvider::new().with_model("m", 8));
        let builder = IndexBuilder::new(provider);
        let store = builder
            .build(ModelConfig::new("m", 8), Vec::new())
            .await
            .unwrap();
        assert!(store.is_empty());
    }
}
