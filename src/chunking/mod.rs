//! Structural chunking pipeline for Markdown documentation.
//!
//! The pipeline has three stages:
//!
//! * [`segmenter`] — splits raw Markdown into blocks (headings, paragraphs,
//!   code fences, tables).
//! * [`assembly`] — packs blocks into token-budgeted chunks with heading
//!   metadata and stable ids.
//! * [`tokenizer`] — token counting shared by both.
//!
//! Chunking is deterministic and idempotent: re-running on unchanged input
//! yields identical chunk boundaries and ids, which is what makes
//! re-ingestion a safe supersede-not-mutate operation.

pub mod assembly;
pub mod config;
pub mod segmenter;
pub mod tokenizer;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::ChunkingConfig;

/// A raw source document handed to the chunker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Stable identifier for the source (path, URL, slug). Chunk ids are
    /// derived from it.
    pub id: String,
    /// Full Markdown text.
    pub text: String,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A semantically bounded span of source text, the unit of retrieval.
///
/// Chunks are immutable once produced; re-running ingestion supersedes them
/// rather than mutating in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within a corpus, stable across re-chunking of the same source.
    pub id: Uuid,
    pub text: String,
    /// Ancestor heading titles, outermost first.
    pub section_path: Vec<String>,
    pub source_doc_id: String,
    /// Always > 0.
    pub token_count: usize,
    /// Position within the source document.
    pub sequence_index: usize,
}

/// Deterministic structural chunker.
///
/// # Examples
///
/// ```
/// use ragbench::chunking::{Chunker, ChunkingConfig, SourceDocument};
///
/// let chunker = Chunker::new(ChunkingConfig::default());
/// let doc = SourceDocument::new("guide", "# Jumping\n\nPress space to jump.\n");
/// let chunks = chunker.chunk(&doc);
/// assert_eq!(chunks[0].section_path, vec!["Jumping".to_string()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Splits `doc` into an ordered chunk sequence.
    ///
    /// A document with no extractable text yields an empty sequence, not an
    /// error. Malformed structural markup degrades to paragraph-level
    /// splitting.
    pub fn chunk(&self, doc: &SourceDocument) -> Vec<Chunk> {
        let blocks = segmenter::segment(&doc.text);
        let chunks = assembly::assemble(doc, blocks, &self.config);
        tracing::debug!(
            source = %doc.id,
            chunks = chunks.len(),
            "chunked document"
        );
        chunks
    }

    /// Chunks several documents, concatenating results in input order.
    /// Sequence indices restart per document; ids stay globally unique
    /// because they incorporate the source id.
    pub fn chunk_all(&self, docs: &[SourceDocument]) -> Vec<Chunk> {
        docs.iter().flat_map(|doc| self.chunk(doc)).collect()
    }
}
