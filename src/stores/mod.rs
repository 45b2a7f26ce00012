//! Per-model index stores: build, persist, load, search.
//!
//! Each embedding model owns one [`IndexStore`]: an HNSW graph over that
//! model's vectors plus the position → chunk mapping and the model's
//! configuration. Stores are built as a one-shot batch (rebuilding is the
//! canonical way to add or remove chunks) and are strictly read-only after
//! build or load, so concurrent searches need no locking.
//!
//! # Persisted layout
//!
//! One directory per model, three files, all versioned JSON:
//!
//! ```text
//! <root>/<model_key>/
//!   index.json      HNSW graph + normalized vectors
//!   metadata.json   ordered chunk attributes (position-aligned)
//!   config.json     model key, dimension, metric, index params, total count
//! ```
//!
//! Loading reads all three and cross-validates the chunk count; any
//! inconsistency surfaces as [`RagError::CorruptIndex`] for that model only.

pub mod hnsw;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::chunking::Chunk;
use crate::types::RagError;

pub use hnsw::{HnswGraph, HnswParams};

/// Bump when the persisted layout changes shape.
pub const INDEX_FORMAT_VERSION: u32 = 1;

pub const INDEX_FILE: &str = "index.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const CONFIG_FILE: &str = "config.json";

/// Distance metric for a model's index. Only cosine is supported today; the
/// enum keeps the persisted config self-describing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

/// Static description of an embedding model.
///
/// Immutable once an index has been built from it; changing `dimension` or
/// `distance_metric` requires a full rebuild.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stable identifier, also the persisted directory name.
    pub model_key: String,
    pub display_name: String,
    pub dimension: usize,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
    #[serde(default)]
    pub index_params: HnswParams,
}

impl ModelConfig {
    pub fn new(model_key: impl Into<String>, dimension: usize) -> Self {
        let model_key = model_key.into();
        Self {
            display_name: model_key.clone(),
            model_key,
            dimension,
            distance_metric: DistanceMetric::Cosine,
            index_params: HnswParams::default(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    #[must_use]
    pub fn with_index_params(mut self, index_params: HnswParams) -> Self {
        self.index_params = index_params;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIndex {
    format_version: u32,
    graph: HnswGraph,
}

#[derive(Serialize, Deserialize)]
struct StoredMetadata {
    format_version: u32,
    chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct StoredConfig {
    format_version: u32,
    #[serde(flatten)]
    config: ModelConfig,
    total_chunks: usize,
    built_at: DateTime<Utc>,
}

/// One model's searchable index: ANN graph + chunk mapping + config.
#[derive(Debug)]
pub struct IndexStore {
    config: ModelConfig,
    graph: HnswGraph,
    /// Position-aligned with graph ids: `chunks[i]` is the chunk behind
    /// internal position `i`.
    chunks: Vec<Chunk>,
    built_at: DateTime<Utc>,
}

impl IndexStore {
    /// Builds an index from `(chunk, vector)` pairs produced by one model.
    ///
    /// Rejects any vector whose length differs from the configured dimension
    /// with [`RagError::DimensionMismatch`], and duplicate chunk ids with
    /// [`RagError::Storage`]. One-shot batch: rebuild to change the corpus.
    pub fn build(
        config: ModelConfig,
        records: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<Self, RagError> {
        let mut graph = HnswGraph::new(config.dimension, config.index_params.clone());
        let mut chunks = Vec::with_capacity(records.len());
        let mut seen: HashSet<Uuid> = HashSet::with_capacity(records.len());

        for (chunk, vector) in records {
            if vector.len() != config.dimension {
                return Err(RagError::DimensionMismatch {
                    model: config.model_key.clone(),
                    expected: config.dimension,
                    actual: vector.len(),
                });
            }
            if !seen.insert(chunk.id) {
                return Err(RagError::Storage(format!(
                    "duplicate chunk id {} in build set for model '{}'",
                    chunk.id, config.model_key
                )));
            }
            graph.insert(vector);
            chunks.push(chunk);
        }

        tracing::info!(
            model = %config.model_key,
            chunks = chunks.len(),
            dimension = config.dimension,
            "built index"
        );

        Ok(Self {
            config,
            graph,
            chunks,
            built_at: Utc::now(),
        })
    }

    /// Searches the index, returning at most `k` `(chunk id, score)` pairs
    /// with `score >= min_similarity`, scores non-increasing and ties broken
    /// by lower internal position.
    ///
    /// A store built from zero records yields an empty result set, not an
    /// error. Fails with [`RagError::DimensionMismatch`] on a wrong-sized
    /// query.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(Uuid, f32)>, RagError> {
        Ok(self
            .search_positions(query, k, min_similarity)?
            .into_iter()
            .map(|(pos, score)| (self.chunks[pos].id, score))
            .collect())
    }

    /// Like [`search`](Self::search) but resolves positions to full chunks.
    pub fn search_chunks(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(Chunk, f32)>, RagError> {
        Ok(self
            .search_positions(query, k, min_similarity)?
            .into_iter()
            .map(|(pos, score)| (self.chunks[pos].clone(), score))
            .collect())
    }

    fn search_positions(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(usize, f32)>, RagError> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.config.dimension {
            return Err(RagError::DimensionMismatch {
                model: self.config.model_key.clone(),
                expected: self.config.dimension,
                actual: query.len(),
            });
        }

        let ef = self.config.index_params.ef_search.max(k);
        let mut hits: Vec<(usize, f32)> = self
            .graph
            .search(query, ef)
            .into_iter()
            .map(|(pos, score)| (pos as usize, score.clamp(-1.0, 1.0)))
            .filter(|(_, score)| *score >= min_similarity)
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of indexed chunks (equals the ANN graph cardinality).
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Serializes the index into `dir` (created if missing) as the
    /// three-file versioned layout described in the module docs.
    pub async fn persist(&self, dir: impl AsRef<Path>) -> Result<(), RagError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let index = StoredIndex {
            format_version: INDEX_FORMAT_VERSION,
            graph: self.graph.clone(),
        };
        let metadata = StoredMetadata {
            format_version: INDEX_FORMAT_VERSION,
            chunks: self.chunks.clone(),
        };
        let config = StoredConfig {
            format_version: INDEX_FORMAT_VERSION,
            config: self.config.clone(),
            total_chunks: self.chunks.len(),
            built_at: self.built_at,
        };

        fs::write(dir.join(INDEX_FILE), to_json(&self.config.model_key, &index)?).await?;
        fs::write(
            dir.join(METADATA_FILE),
            to_json(&self.config.model_key, &metadata)?,
        )
        .await?;
        fs::write(
            dir.join(CONFIG_FILE),
            to_json(&self.config.model_key, &config)?,
        )
        .await?;

        tracing::info!(model = %self.config.model_key, dir = %dir.display(), "persisted index");
        Ok(())
    }

    /// Reloads a persisted store from `dir`.
    ///
    /// Missing files surface as [`RagError::ModelUnavailable`]; unreadable or
    /// mutually inconsistent files as [`RagError::CorruptIndex`].
    pub async fn load(dir: impl AsRef<Path>, model_key: &str) -> Result<Self, RagError> {
        let dir = dir.as_ref();
        for file in [INDEX_FILE, METADATA_FILE, CONFIG_FILE] {
            if !dir.join(file).exists() {
                return Err(RagError::ModelUnavailable {
                    model: model_key.to_string(),
                    reason: format!("no persisted index at {}", dir.display()),
                });
            }
        }

        let config: StoredConfig =
            read_json(model_key, &dir.join(CONFIG_FILE)).await?;
        let index: StoredIndex = read_json(model_key, &dir.join(INDEX_FILE)).await?;
        let metadata: StoredMetadata =
            read_json(model_key, &dir.join(METADATA_FILE)).await?;

        for (file, version) in [
            (CONFIG_FILE, config.format_version),
            (INDEX_FILE, index.format_version),
            (METADATA_FILE, metadata.format_version),
        ] {
            if version != INDEX_FORMAT_VERSION {
                return Err(RagError::CorruptIndex {
                    model: model_key.to_string(),
                    reason: format!(
                        "{file} has format version {version}, expected {INDEX_FORMAT_VERSION}"
                    ),
                });
            }
        }

        if index.graph.len() != config.total_chunks
            || metadata.chunks.len() != config.total_chunks
        {
            return Err(RagError::CorruptIndex {
                model: model_key.to_string(),
                reason: format!(
                    "config declares {} chunks but index holds {} and metadata {}",
                    config.total_chunks,
                    index.graph.len(),
                    metadata.chunks.len()
                ),
            });
        }
        if index.graph.dimension() != config.config.dimension {
            return Err(RagError::CorruptIndex {
                model: model_key.to_string(),
                reason: format!(
                    "config declares dimension {} but index holds {}",
                    config.config.dimension,
                    index.graph.dimension()
                ),
            });
        }

        tracing::info!(
            model = %model_key,
            chunks = config.total_chunks,
            "loaded persisted index"
        );

        Ok(Self {
            config: config.config,
            graph: index.graph,
            chunks: metadata.chunks,
            built_at: config.built_at,
        })
    }
}

fn to_json<T: Serialize>(model_key: &str, value: &T) -> Result<String, RagError> {
    serde_json::to_string(value).map_err(|err| RagError::Storage(format!(
        "failed to serialize index for model '{model_key}': {err}"
    )))
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    model_key: &str,
    path: &Path,
) -> Result<T, RagError> {
    let raw = fs::read_to_string(path).await?;
    serde_json::from_str(&raw).map_err(|err| RagError::CorruptIndex {
        model: model_key.to_string(),
        reason: format!("{}: {err}", path.display()),
    })
}
