//! End-to-end walkthrough: chunk a document, build two model indices,
//! then run a single-model query and a compare-all request.
//!
//! Uses the deterministic mock embedding provider so it runs offline:
//!
//! ```bash
//! cargo run --example pipeline
//! ```

use std::sync::Arc;

use ragbench::chunking::{Chunker, ChunkingConfig, SourceDocument};
use ragbench::embeddings::MockEmbeddingProvider;
use ragbench::ingestion::{BuildProgress, IndexBuilder};
use ragbench::query::QueryEngine;
use ragbench::registry::ModelRegistry;
use ragbench::stores::ModelConfig;
use ragbench::types::RagError;

const GUIDE: &str = r#"# Player Movement

Walking and running are driven by the input axis. The controller samples the
axis every frame and applies acceleration until the configured top speed.

## Jumping

How do I make a character jump? Press the jump button while the character is
grounded. Coyote time gives a short grace period after leaving a ledge.

```rust
fn jump(&mut self) {
    if self.grounded {
        self.velocity.y = self.jump_impulse;
    }
}
```

## Falling

Gravity is integrated explicitly. Terminal velocity caps the fall speed so
long drops stay controllable.
"#;

#[tokio::main]
async fn main() -> Result<(), RagError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 1. Chunk the source document.
    let chunker = Chunker::new(ChunkingConfig::default());
    let chunks = chunker.chunk(&SourceDocument::new("movement-guide", GUIDE));
    println!("chunked into {} chunks:", chunks.len());
    for chunk in &chunks {
        println!(
            "  [{}] {} tokens  {:?}",
            chunk.sequence_index, chunk.token_count, chunk.section_path
        );
    }

    // 2. Build and persist an index per model.
    let index_root = tempfile::tempdir().map_err(RagError::Io)?;
    let configs = vec![
        ModelConfig::new("minilm-384", 384).with_display_name("MiniLM (384d)"),
        ModelConfig::new("mpnet-768", 768).with_display_name("MPNet (768d)"),
    ];
    let provider = Arc::new(
        MockEmbeddingProvider::new()
            .with_model("minilm-384", 384)
            .with_model("mpnet-768", 768),
    );

    let registry = Arc::new(ModelRegistry::new(index_root.path(), configs.clone()));
    let builder = IndexBuilder::new(provider.clone())
        .with_batch_size(8)
        .with_progress(Arc::new(|p: &BuildProgress| {
            println!(
                "  {}: batch {}/{} ({}/{} chunks)",
                p.model_key, p.batch, p.total_batches, p.chunks_embedded, p.total_chunks
            );
        }));

    for config in configs {
        println!("building index for {}...", config.model_key);
        builder
            .build_into_registry(&registry, config, chunks.clone())
            .await?;
    }

    // 3. Single-model query.
    let engine = QueryEngine::new(Arc::clone(&registry), provider);
    let question = "How do I make a character jump?";

    let response = engine.query_model("minilm-384", question, 3, 0.2).await?;
    println!("\n[minilm-384] {} results in {}ms:", response.results.len(), response.duration_ms);
    for hit in &response.results {
        println!(
            "  {:.3}  {:?}  {}",
            hit.score,
            hit.section_path,
            hit.text.lines().next().unwrap_or_default()
        );
    }

    // 4. Compare-all across every available model.
    let report = engine.compare_all(question, 3, 0.2).await?;
    println!("\ncomparison:");
    for row in &report.comparison {
        println!(
            "  {:<12} {:?}  {} results  avg {:.3}  {} tokens  {}ms",
            row.model_key,
            row.status,
            row.result_count,
            row.avg_similarity,
            row.total_tokens,
            row.duration_ms
        );
    }

    // 5. Registry stats.
    let stats = registry.stats_all();
    println!("\nmodels:");
    for model in &stats.models {
        println!(
            "  {:<12} dim {:<4} {} chunks  {:?}",
            model.model_key, model.dimension, model.total_chunks, model.state
        );
    }

    Ok(())
}
