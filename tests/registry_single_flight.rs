//! Registry lifecycle tests: lazy loading, single-flight, retry semantics.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use ragbench::chunking::{Chunker, ChunkingConfig, SourceDocument};
use ragbench::embeddings::mock_embedding;
use ragbench::registry::{ModelRegistry, ModelState, StoreLoader};
use ragbench::stores::{IndexStore, ModelConfig};
use ragbench::types::RagError;

fn small_store(config: &ModelConfig) -> IndexStore {
    let chunks = Chunker::new(ChunkingConfig::default()).chunk(&SourceDocument::new(
        "fixture",
        "# One\n\nfirst paragraph\n\n# Two\n\nsecond paragraph\n",
    ));
    let records = chunks
        .into_iter()
        .map(|chunk| {
            let vector = mock_embedding(&chunk.text, config.dimension);
            (chunk, vector)
        })
        .collect();
    IndexStore::build(config.clone(), records).expect("fixture store builds")
}

#[derive(Clone, Copy)]
enum LoadOutcome {
    Ok,
    Corrupt,
    Missing,
}

/// Loader that counts invocations and simulates slow disk reads.
struct CountingLoader {
    calls: AtomicUsize,
    outcome: LoadOutcome,
}

impl CountingLoader {
    fn new(outcome: LoadOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }
}

#[async_trait]
impl StoreLoader for CountingLoader {
    async fn load(&self, _dir: &Path, config: &ModelConfig) -> Result<IndexStore, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        match self.outcome {
            LoadOutcome::Ok => Ok(small_store(config)),
            LoadOutcome::Corrupt => Err(RagError::CorruptIndex {
                model: config.model_key.clone(),
                reason: "injected".to_string(),
            }),
            LoadOutcome::Missing => Err(RagError::ModelUnavailable {
                model: config.model_key.clone(),
                reason: "no persisted index".to_string(),
            }),
        }
    }
}

#[tokio::test]
async fn concurrent_ensure_ready_loads_once() {
    let loader = CountingLoader::new(LoadOutcome::Ok);
    let registry = Arc::new(ModelRegistry::with_loader(
        "/tmp/unused",
        vec![ModelConfig::new("shared", 32)],
        loader.clone(),
    ));

    let callers = (0..16).map(|_| {
        let registry = Arc::clone(&registry);
        async move { registry.ensure_ready("shared").await }
    });
    let results = join_all(callers).await;

    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().expect("load succeeds");
    for result in &results {
        let store = result.as_ref().expect("all callers succeed");
        assert!(Arc::ptr_eq(first, store), "all callers share one store");
    }
    assert_eq!(registry.state("shared").unwrap(), ModelState::Ready);
}

#[tokio::test]
async fn concurrent_failure_is_shared_and_terminal_until_retry() {
    let loader = CountingLoader::new(LoadOutcome::Corrupt);
    let registry = Arc::new(ModelRegistry::with_loader(
        "/tmp/unused",
        vec![ModelConfig::new("flaky", 32)],
        loader.clone(),
    ));

    let callers = (0..8).map(|_| {
        let registry = Arc::clone(&registry);
        async move { registry.ensure_ready("flaky").await }
    });
    let results = join_all(callers).await;

    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    for result in &results {
        assert!(result.is_err());
    }
    assert_eq!(registry.state("flaky").unwrap(), ModelState::Failed);

    // Failed is terminal for the attempt: no new load happens.
    let err = registry.ensure_ready("flaky").await.unwrap_err();
    assert!(matches!(err, RagError::ModelUnavailable { .. }));
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

    // An explicit retry re-arms the slot.
    registry.retry("flaky").unwrap();
    assert_eq!(registry.state("flaky").unwrap(), ModelState::Registered);
    let _ = registry.ensure_ready("flaky").await;
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_missing_index_loads_once() {
    let loader = CountingLoader::new(LoadOutcome::Missing);
    let registry = Arc::new(ModelRegistry::with_loader(
        "/tmp/unused",
        vec![ModelConfig::new("later", 32)],
        loader.clone(),
    ));

    let callers = (0..8).map(|_| {
        let registry = Arc::clone(&registry);
        async move { registry.ensure_ready("later").await }
    });
    let results = join_all(callers).await;

    // Queued callers share the one flight's outcome instead of reloading.
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    for result in &results {
        assert!(matches!(
            result,
            Err(RagError::ModelUnavailable { .. })
        ));
    }

    // The slot stays Registered so the model can be ingested later, and a
    // fresh caller is allowed a new load attempt.
    assert_eq!(registry.state("later").unwrap(), ModelState::Registered);
    let _ = registry.ensure_ready("later").await;
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lazy_load_from_disk_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let config = ModelConfig::new("disk", 32);
    let registry = ModelRegistry::new(root.path(), vec![config.clone()]);

    assert!(registry.list_available().is_empty());

    // Persist a store where the registry expects it, then load lazily.
    small_store(&config)
        .persist(registry.model_dir("disk"))
        .await
        .unwrap();

    assert_eq!(registry.list_available(), vec!["disk".to_string()]);
    let store = registry.ensure_ready("disk").await.unwrap();
    assert!(!store.is_empty());
    assert_eq!(registry.state("disk").unwrap(), ModelState::Ready);
}

#[tokio::test]
async fn insert_ready_makes_fresh_build_queryable() {
    let config = ModelConfig::new("fresh", 16);
    let registry = ModelRegistry::new("/tmp/unused", vec![config.clone()]);

    assert!(registry.get_if_ready("fresh").is_err());
    registry.insert_ready(small_store(&config)).unwrap();
    let store = registry.get_if_ready("fresh").unwrap();
    assert_eq!(store.config().model_key, "fresh");
}

#[tokio::test]
async fn stats_report_state_and_counts() {
    let config = ModelConfig::new("stats", 16);
    let registry = ModelRegistry::new("/tmp/unused", vec![config.clone()]);

    let before = registry.stats("stats").unwrap();
    assert_eq!(before.state, ModelState::Registered);
    assert_eq!(before.total_chunks, 0);
    assert_eq!(before.dimension, 16);

    registry.insert_ready(small_store(&config)).unwrap();
    let after = registry.stats("stats").unwrap();
    assert_eq!(after.state, ModelState::Ready);
    assert!(after.total_chunks > 0);

    let all = registry.stats_all();
    assert_eq!(all.models.len(), 1);

    registry.close();
    assert_eq!(registry.state("stats").unwrap(), ModelState::Registered);
}
