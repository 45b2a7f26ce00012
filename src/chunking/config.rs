//! Tunable parameters for the structural chunker.

use serde::{Deserialize, Serialize};

/// Controls chunk boundaries and token budgets.
///
/// Defaults follow the common hybrid-chunking setup for technical
/// documentation: 512-token chunks with undersized peers merged back
/// together when they share a heading path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum token budget per chunk. Oversized paragraphs are split at
    /// sentence boundaries; atomic units (code fences, tables) may exceed
    /// this when they cannot be split further.
    pub max_tokens: usize,
    /// Fragments below this floor are merged with a following fragment that
    /// shares the same section path.
    pub min_tokens: usize,
    /// Whether undersized peers are merged at all. Disable to inspect raw
    /// structural boundaries.
    pub merge_peers: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            min_tokens: 64,
            merge_peers: true,
        }
    }
}
