//! Model registry: catalog of configured models and lazy, single-flight
//! materialization of their index stores.
//!
//! Indices are large, so nothing is loaded at startup; each model's store is
//! materialized on first access. The per-model state machine is
//! `Registered → Loading → Ready | Failed`. Loading is single-flight: one
//! async mutex per model key serializes load attempts, so N concurrent
//! callers trigger exactly one disk load and all observe its outcome. There
//! is deliberately no global lock — models load independently.
//!
//! `Failed` is terminal for that attempt; [`ModelRegistry::retry`] resets the
//! slot so a later call may attempt another load. A model whose files simply
//! do not exist yet stays `Registered` rather than `Failed`, so ingesting it
//! later works without an explicit retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::stores::{IndexStore, ModelConfig, CONFIG_FILE};
use crate::types::RagError;

/// Observable lifecycle state of one model's index slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Registered,
    Loading,
    Ready,
    Failed,
}

enum Slot {
    Registered,
    Loading,
    Ready(Arc<IndexStore>),
    Failed(String),
}

impl Slot {
    fn state(&self) -> ModelState {
        match self {
            Slot::Registered => ModelState::Registered,
            Slot::Loading => ModelState::Loading,
            Slot::Ready(_) => ModelState::Ready,
            Slot::Failed(_) => ModelState::Failed,
        }
    }
}

/// Loads a persisted store for one model. The registry's seam for tests and
/// alternative storage layouts; the default reads the filesystem layout
/// produced by [`IndexStore::persist`].
#[async_trait]
pub trait StoreLoader: Send + Sync {
    async fn load(&self, dir: &Path, config: &ModelConfig) -> Result<IndexStore, RagError>;
}

struct FsStoreLoader;

#[async_trait]
impl StoreLoader for FsStoreLoader {
    async fn load(&self, dir: &Path, config: &ModelConfig) -> Result<IndexStore, RagError> {
        IndexStore::load(dir, &config.model_key).await
    }
}

struct ModelEntry {
    config: ModelConfig,
    slot: RwLock<Slot>,
    /// Serializes load attempts for this model only.
    load_gate: Mutex<()>,
    /// Completed-flight latch for callers already queued on the gate. The
    /// `Ready`/`Failed` outcomes are observable through the slot, but a
    /// nothing-persisted load resets the slot to `Registered`; the latch is
    /// what stops queued waiters from each re-running that load.
    flight: RwLock<FlightLatch>,
}

#[derive(Default)]
struct FlightLatch {
    generation: u64,
    /// Set when the latest flight found nothing persisted.
    unavailable: Option<String>,
}

/// Per-model statistics row.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub model_key: String,
    pub dimension: usize,
    /// Chunk count when the store is `Ready`, 0 otherwise.
    pub total_chunks: usize,
    pub state: ModelState,
}

/// Aggregate stats for every configured model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub models: Vec<ModelStats>,
    pub available_models: Vec<String>,
}

/// Owns the catalog of configured models and their index stores.
///
/// The registry is constructed once at process start and shared (by `Arc`)
/// with the query engine and any adapters. It exclusively owns the stores;
/// readers only ever get `Arc<IndexStore>` handles to immutable data.
pub struct ModelRegistry {
    root: PathBuf,
    entries: Vec<Arc<ModelEntry>>,
    loader: Arc<dyn StoreLoader>,
}

impl ModelRegistry {
    /// Creates a registry over the persisted-index root directory.
    pub fn new(root: impl Into<PathBuf>, configs: Vec<ModelConfig>) -> Self {
        Self::with_loader(root, configs, Arc::new(FsStoreLoader))
    }

    /// Like [`new`](Self::new) with a custom [`StoreLoader`].
    pub fn with_loader(
        root: impl Into<PathBuf>,
        configs: Vec<ModelConfig>,
        loader: Arc<dyn StoreLoader>,
    ) -> Self {
        let entries = configs
            .into_iter()
            .map(|config| {
                Arc::new(ModelEntry {
                    config,
                    slot: RwLock::new(Slot::Registered),
                    load_gate: Mutex::new(()),
                    flight: RwLock::new(FlightLatch::default()),
                })
            })
            .collect();
        Self {
            root: root.into(),
            entries,
            loader,
        }
    }

    /// Directory holding one model's persisted files.
    pub fn model_dir(&self, model_key: &str) -> PathBuf {
        self.root.join(model_key)
    }

    /// Configured model keys in catalog order.
    pub fn configured_models(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.config.model_key.clone())
            .collect()
    }

    pub fn config(&self, model_key: &str) -> Option<&ModelConfig> {
        self.entries
            .iter()
            .find(|e| e.config.model_key == model_key)
            .map(|e| &e.config)
    }

    fn entry(&self, model_key: &str) -> Result<&Arc<ModelEntry>, RagError> {
        self.entries
            .iter()
            .find(|e| e.config.model_key == model_key)
            .ok_or_else(|| RagError::ModelUnavailable {
                model: model_key.to_string(),
                reason: "model is not configured".to_string(),
            })
    }

    /// Models that can serve queries right now: already `Ready`, or with a
    /// readable persisted config on disk. Catalog order.
    pub fn list_available(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| {
                if matches!(*entry.slot.read(), Slot::Ready(_)) {
                    return true;
                }
                self.model_dir(&entry.config.model_key)
                    .join(CONFIG_FILE)
                    .is_file()
            })
            .map(|entry| entry.config.model_key.clone())
            .collect()
    }

    /// Returns the store for `model_key`, lazily loading it on first access.
    ///
    /// Single-flight: concurrent calls for the same unready model share one
    /// underlying load. A previously failed load surfaces as
    /// [`RagError::ModelUnavailable`] until [`retry`](Self::retry) resets the
    /// slot.
    pub async fn ensure_ready(&self, model_key: &str) -> Result<Arc<IndexStore>, RagError> {
        let entry = Arc::clone(self.entry(model_key)?);

        if let Slot::Ready(store) = &*entry.slot.read() {
            return Ok(Arc::clone(store));
        }

        let queued_at = entry.flight.read().generation;
        let _gate = entry.load_gate.lock().await;

        // A concurrent holder may have finished while we waited on the gate.
        match &*entry.slot.read() {
            Slot::Ready(store) => return Ok(Arc::clone(store)),
            Slot::Failed(reason) => {
                return Err(RagError::ModelUnavailable {
                    model: model_key.to_string(),
                    reason: format!("previous load failed: {reason}"),
                });
            }
            Slot::Registered | Slot::Loading => {}
        }

        // A flight that completed while we queued and found nothing persisted
        // leaves the slot `Registered`; share its outcome instead of loading
        // again.
        {
            let flight = entry.flight.read();
            if flight.generation != queued_at {
                if let Some(reason) = &flight.unavailable {
                    return Err(RagError::ModelUnavailable {
                        model: model_key.to_string(),
                        reason: reason.clone(),
                    });
                }
            }
        }

        *entry.slot.write() = Slot::Loading;
        tracing::info!(model = %model_key, "loading index");

        let dir = self.model_dir(model_key);
        let outcome = self.loader.load(&dir, &entry.config).await;

        let mut flight = entry.flight.write();
        flight.generation = flight.generation.wrapping_add(1);
        flight.unavailable = None;

        match outcome {
            Ok(store) => {
                let store = Arc::new(store);
                *entry.slot.write() = Slot::Ready(Arc::clone(&store));
                Ok(store)
            }
            Err(RagError::ModelUnavailable { model, reason }) => {
                // Nothing persisted yet: not a terminal failure, the model
                // may be ingested later.
                flight.unavailable = Some(reason.clone());
                *entry.slot.write() = Slot::Registered;
                Err(RagError::ModelUnavailable { model, reason })
            }
            Err(err) => {
                tracing::warn!(model = %model_key, error = %err, "index load failed");
                *entry.slot.write() = Slot::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Returns the store only if it is already `Ready`, without triggering a
    /// load. For adapters that must not block on disk.
    pub fn get_if_ready(&self, model_key: &str) -> Result<Arc<IndexStore>, RagError> {
        let entry = self.entry(model_key)?;
        match &*entry.slot.read() {
            Slot::Ready(store) => Ok(Arc::clone(store)),
            _ => Err(RagError::IndexNotLoaded {
                model: model_key.to_string(),
            }),
        }
    }

    /// Hands a freshly built store to the registry (the ingestion path uses
    /// this to make a new build queryable without a reload from disk).
    pub fn insert_ready(&self, store: IndexStore) -> Result<Arc<IndexStore>, RagError> {
        let entry = self.entry(&store.config().model_key.clone())?;
        let store = Arc::new(store);
        *entry.slot.write() = Slot::Ready(Arc::clone(&store));
        Ok(store)
    }

    /// Resets a `Failed` slot to `Registered` so the next access may attempt
    /// another load. No-op for other states.
    pub fn retry(&self, model_key: &str) -> Result<(), RagError> {
        let entry = self.entry(model_key)?;
        let mut slot = entry.slot.write();
        if matches!(*slot, Slot::Failed(_)) {
            *slot = Slot::Registered;
        }
        Ok(())
    }

    pub fn state(&self, model_key: &str) -> Result<ModelState, RagError> {
        Ok(self.entry(model_key)?.slot.read().state())
    }

    pub fn stats(&self, model_key: &str) -> Result<ModelStats, RagError> {
        let entry = self.entry(model_key)?;
        let slot = entry.slot.read();
        let total_chunks = match &*slot {
            Slot::Ready(store) => store.len(),
            _ => 0,
        };
        Ok(ModelStats {
            model_key: entry.config.model_key.clone(),
            dimension: entry.config.dimension,
            total_chunks,
            state: slot.state(),
        })
    }

    /// Stats for every configured model plus the available set.
    pub fn stats_all(&self) -> StatsResponse {
        let models = self
            .entries
            .iter()
            .map(|entry| {
                self.stats(&entry.config.model_key)
                    .expect("configured entry has stats")
            })
            .collect();
        StatsResponse {
            models,
            available_models: self.list_available(),
        }
    }

    /// Teardown: drops every loaded store. Slots return to `Registered`.
    pub fn close(&self) {
        for entry in &self.entries {
            *entry.slot.write() = Slot::Registered;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_unavailable() {
        let registry = ModelRegistry::new("/tmp/none", vec![ModelConfig::new("known", 8)]);
        assert!(matches!(
            registry.get_if_ready("unknown"),
            Err(RagError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn unloaded_model_is_not_loaded() {
        let registry = ModelRegistry::new("/tmp/none", vec![ModelConfig::new("known", 8)]);
        assert!(matches!(
            registry.get_if_ready("known"),
            Err(RagError::IndexNotLoaded { .. })
        ));
        assert_eq!(registry.state("known").unwrap(), ModelState::Registered);
    }

    #[tokio::test]
    async fn ensure_ready_without_persisted_files_stays_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), vec![ModelConfig::new("m", 8)]);
        let err = registry.ensure_ready("m").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
        assert_eq!(registry.state("m").unwrap(), ModelState::Registered);
    }

    #[test]
    fn list_available_is_empty_without_persisted_dirs() {
        let registry = ModelRegistry::new(
            "/tmp/definitely-missing-ragbench",
            vec![ModelConfig::new("a", 8), ModelConfig::new("b", 16)],
        );
        assert!(registry.list_available().is_empty());
    }
}
