//! Semantic chunking and multi-model vector retrieval.
//!
//! ```text
//! Markdown docs ──► chunking::Chunker ──► Vec<Chunk>
//!                                            │
//!                (offline, one model at a time)
//!                                            ▼
//! embeddings::EmbeddingProvider ──► ingestion::IndexBuilder
//!                                            │
//!                                            ▼
//!                        stores::IndexStore (HNSW + metadata + config)
//!                                            │  persist / lazy load
//!                                            ▼
//!                        registry::ModelRegistry (one store per model)
//!                                            │  read-only borrows
//!                                            ▼
//!                        query::QueryEngine ──► single / compare-all
//! ```
//!
//! The crate is the engine only: HTTP routing, UI, and CLI wrappers are
//! external adapters consuming [`query::QueryEngine`] and
//! [`registry::ModelRegistry`].

pub mod chunking;
pub mod embeddings;
pub mod ingestion;
pub mod query;
pub mod registry;
pub mod stores;
pub mod types;

pub use chunking::{Chunk, Chunker, ChunkingConfig, SourceDocument};
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use ingestion::{BuildProgress, IndexBuilder};
pub use query::{
    ComparisonResponse, ComparisonRow, ModelOutcome, QueryEngine, QueryOutput, QueryRequest,
    QueryResponse, ScoredChunk,
};
pub use registry::{ModelRegistry, ModelState, ModelStats, StatsResponse, StoreLoader};
pub use stores::{DistanceMetric, HnswParams, IndexStore, ModelConfig};
pub use types::{ModelFailure, RagError};
