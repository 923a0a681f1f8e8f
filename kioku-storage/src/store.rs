//! # Embedding Store
//!
//! In-memory map from string id to embedding, with exact cosine search and
//! whole-store persistence.
//!
//! ## Concurrency
//!
//! All state sits behind one `RwLock`. Searches, saves and reads share it;
//! inserts, removals, `clear` and `load` take it exclusively. `load` decodes the
//! file before taking the lock and swaps the new state in with one assignment,
//! so a failed load never leaves a half-replaced store.
//!
//! ## Modes
//!
//! A store is either full precision or quantized, fixed at construction. In
//! quantized mode every vector is stored as int8 codes and searched through its
//! reconstruction.

use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use kioku_core::config::{Config, PersistenceConfig};
use kioku_core::error::{Error, Result};
use kioku_core::metrics::{MetricsSnapshot, StoreMetrics, Timer};
use kioku_core::types::validate_components;
use kioku_core::SearchHit;
use kioku_index::rank;

use crate::flat;
use crate::persistence;
use crate::record::{Embedding, StoreState};

pub struct EmbeddingStore {
    quantized: bool,
    persistence: PersistenceConfig,
    state: RwLock<StoreState>,
    metrics: StoreMetrics,
}

impl EmbeddingStore {
    /// Empty store with default persistence settings
    pub fn new(quantized: bool) -> Self {
        Self::from_parts(quantized, PersistenceConfig::default())
    }

    /// Empty store configured from `config`
    pub fn with_config(config: &Config) -> Self {
        Self::from_parts(config.store.quantization, config.persistence.clone())
    }

    fn from_parts(quantized: bool, persistence: PersistenceConfig) -> Self {
        Self {
            quantized,
            persistence,
            state: RwLock::new(StoreState::new(quantized)),
            metrics: StoreMetrics::new(),
        }
    }

    /// Build a store from a saved file, adopting the file's mode
    pub fn open(path: impl AsRef<Path>, key: Option<&str>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let metrics = StoreMetrics::new();
        let (state, bytes) = match read_state(path, key) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Failed to open store {:?}: {}", path, e);
                metrics.record_load_failure();
                return Err(e);
            }
        };
        metrics.record_load(bytes);

        info!(
            "Opened store {:?}: {} vectors, dim {}, quantized={}",
            path,
            state.len(),
            state.dimension,
            state.quantized
        );

        Ok(Self {
            quantized: state.quantized,
            persistence: config.persistence.clone(),
            state: RwLock::new(state),
            metrics,
        })
    }

    /// Insert or replace the vector stored under `id`.
    ///
    /// The first insert into an empty store fixes its dimension; later inserts
    /// must match it.
    pub fn add_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let result = self.insert(id, vector);
        match &result {
            Ok(()) => self.metrics.record_insert(),
            Err(e) => {
                debug!("Rejected insert of {:?}: {}", id, e);
                self.metrics.record_rejected_insert();
            }
        }
        result
    }

    fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_input("id must not be empty"));
        }
        if vector.is_empty() {
            return Err(Error::invalid_input("vector must not be empty"));
        }
        validate_components(vector)?;

        // Encode before locking; quantization is the expensive part.
        let embedding = Embedding::encode(vector, self.quantized);

        let mut state = self.state.write();
        if state.is_empty() {
            state.dimension = vector.len();
        } else if vector.len() != state.dimension {
            return Err(Error::DimensionMismatch {
                expected: state.dimension,
                actual: vector.len(),
            });
        }
        state.records.insert(id.to_string(), embedding);
        Ok(())
    }

    /// Top `limit` records by cosine similarity to `query`.
    ///
    /// An empty store, `limit == 0`, or a query of the wrong length all
    /// yield an empty list; see [`try_search`](Self::try_search) to tell
    /// them apart.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<SearchHit> {
        match self.try_search(query, limit) {
            Ok(hits) => hits,
            Err(e) => {
                debug!("Search returned no results: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`search`](Self::search) but reports a dimension mismatch or a
    /// non-finite query component
    pub fn try_search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        if state.is_empty() || limit == 0 {
            self.metrics.record_search();
            return Ok(Vec::new());
        }
        if query.len() != state.dimension {
            self.metrics.record_rejected_search();
            return Err(Error::DimensionMismatch {
                expected: state.dimension,
                actual: query.len(),
            });
        }
        if let Err(e) = validate_components(query) {
            self.metrics.record_rejected_search();
            return Err(e);
        }

        let candidates = state
            .records
            .iter()
            .map(|(id, embedding)| (id.as_str(), embedding.values()));
        let hits = rank(query, candidates, limit);
        self.metrics.record_search();
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Pinned dimension, `0` while empty
    pub fn dimension(&self) -> usize {
        self.state.read().dimension
    }

    pub fn is_quantized(&self) -> bool {
        self.quantized
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().records.contains_key(id)
    }

    /// Stored vector for `id`; reconstructed values in quantized mode
    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.state
            .read()
            .records
            .get(id)
            .map(|e| e.values().into_owned())
    }

    /// All ids in ascending order
    pub fn ids(&self) -> Vec<String> {
        self.state.read().records.keys().cloned().collect()
    }

    /// Remove one record. Removing the last record unpins the dimension.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.records.remove(id).is_some();
        if state.is_empty() {
            state.dimension = 0;
        }
        removed
    }

    /// Drop every record and unpin the dimension
    pub fn clear(&self) {
        let mut state = self.state.write();
        let dropped = state.len();
        state.records.clear();
        state.dimension = 0;
        drop(state);

        self.metrics.record_clear();
        info!("Cleared store ({} vectors)", dropped);
    }

    /// Write the whole store to `path`, encrypted when `key` is given.
    ///
    /// The file is replaced atomically; on error any previous file at `path`
    /// is left as it was.
    pub fn save(&self, path: impl AsRef<Path>, key: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let timer = Timer::new("store.save");
        match self.write_file(path, key) {
            Ok(bytes) => {
                self.metrics.record_save(bytes);
                info!(
                    "Saved store to {:?} ({} bytes, encrypted={}, {:?})",
                    path,
                    bytes,
                    key.is_some(),
                    timer.stop()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save store to {:?}: {}", path, e);
                self.metrics.record_save_failure();
                Err(e)
            }
        }
    }

    fn write_file(&self, path: &Path, key: Option<&str>) -> Result<u64> {
        if key.is_some_and(str::is_empty) {
            return Err(Error::invalid_input("encryption key must not be empty"));
        }
        let plaintext = {
            let state = self.state.read();
            persistence::encode(&state)?
        };
        let payload = persistence::seal_payload(plaintext, key, self.persistence.kdf_iterations)?;
        persistence::write_atomic(path, &payload, self.persistence.sync_writes)?;
        Ok(payload.len() as u64)
    }

    /// Replace the store's contents with the file at `path`.
    ///
    /// The file must have been saved in this store's mode. On any error the
    /// current contents are unchanged.
    pub fn load(&self, path: impl AsRef<Path>, key: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let timer = Timer::new("store.load");

        let loaded = read_state(path, key).and_then(|(state, bytes)| {
            if state.quantized != self.quantized {
                return Err(Error::format(format!(
                    "file mode (quantized={}) does not match store mode (quantized={})",
                    state.quantized, self.quantized
                )));
            }
            Ok((state, bytes))
        });

        match loaded {
            Ok((state, bytes)) => {
                let count = state.len();
                *self.state.write() = state;
                self.metrics.record_load(bytes);
                info!("Loaded {} vectors from {:?} ({:?})", count, path, timer.stop());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load store from {:?}: {}", path, e);
                self.metrics.record_load_failure();
                Err(e)
            }
        }
    }

    /// Export a read-only snapshot for [`FlatVectorStore`](crate::FlatVectorStore)
    pub fn save_flat(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = {
            let state = self.state.read();
            flat::encode_flat(&state)?
        };
        persistence::write_atomic(path, &bytes, self.persistence.sync_writes)?;
        info!("Exported flat snapshot to {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for EmbeddingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("EmbeddingStore")
            .field("quantized", &self.quantized)
            .field("dimension", &state.dimension)
            .field("len", &state.len())
            .finish()
    }
}

fn read_state(path: &Path, key: Option<&str>) -> Result<(StoreState, u64)> {
    if key.is_some_and(str::is_empty) {
        return Err(Error::invalid_input("encryption key must not be empty"));
    }
    let raw = persistence::read_file(path)?;
    let bytes = raw.len() as u64;
    let plaintext = persistence::open_payload(raw, key)?;
    let state = persistence::decode(&plaintext)?;
    Ok((state, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmbeddingStore>();
    }

    #[test]
    fn test_first_insert_pins_dimension() {
        let store = EmbeddingStore::new(false);
        assert_eq!(store.dimension(), 0);
        store.add_vector("a", &[1.0, 2.0]).unwrap();
        assert_eq!(store.dimension(), 2);
        assert!(matches!(
            store.add_vector("b", &[1.0]),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_last_unpins() {
        let store = EmbeddingStore::new(false);
        store.add_vector("a", &[1.0, 2.0]).unwrap();
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.dimension(), 0);
        store.add_vector("b", &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.dimension(), 3);
    }

    #[test]
    fn test_rejects_bad_input() {
        let store = EmbeddingStore::new(true);
        assert!(matches!(store.add_vector("", &[1.0]), Err(Error::InvalidInput { .. })));
        assert!(matches!(store.add_vector("a", &[]), Err(Error::InvalidInput { .. })));
        assert!(matches!(
            store.add_vector("a", &[1.0, f32::NAN]),
            Err(Error::InvalidInput { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(store.metrics().rejected_inserts, 3);
    }

    #[test]
    fn test_non_finite_query() {
        let store = EmbeddingStore::new(false);
        store.add_vector("a", &[1.0, 0.0]).unwrap();
        assert!(store.search(&[f32::NAN, 0.0], 1).is_empty());
        assert!(matches!(
            store.try_search(&[f32::INFINITY, 0.0], 1),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_get_and_ids() {
        let store = EmbeddingStore::new(false);
        store.add_vector("b", &[0.0, 1.0]).unwrap();
        store.add_vector("a", &[1.0, 0.0]).unwrap();
        assert_eq!(store.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.get("b"), Some(vec![0.0, 1.0]));
        assert!(store.get("c").is_none());
        assert!(store.contains("a"));
    }
}
