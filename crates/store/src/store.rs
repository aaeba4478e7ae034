//! Maps engine state onto namespaced storage keys.
//!
//! Layout under namespace `ns`:
//! - `ns:catalog` — every experiment with its variants and counters
//! - `ns:assignments:<visitor>` — one visitor's experiment → variant map
//!
//! Reads never fail: a missing key is a first visit, and an unparsable one
//! is discarded with a warning so the engine starts fresh.

use serde::de::DeserializeOwned;
use splitlane_core::config::{StorageBackendKind, StorageConfig};
use splitlane_core::types::{Catalog, VisitorAssignments};
use splitlane_core::{CatalogState, SplitlaneResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{FileStorage, LocalStorage, StorageBackend};

pub struct PersistenceStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Build the backend named in the storage configuration.
    pub fn open(config: &StorageConfig, namespace: &str) -> SplitlaneResult<Self> {
        let backend: Arc<dyn StorageBackend> = match config.backend {
            StorageBackendKind::Memory => Arc::new(LocalStorage::new(
                config.retention_secs,
                config.max_entries,
            )),
            StorageBackendKind::File => Arc::new(
                FileStorage::new(&config.path)?.with_retention(config.retention_secs),
            ),
        };
        info!(backend = ?config.backend, namespace = namespace, "Persistence store opened");
        Ok(Self::new(backend, namespace))
    }

    /// Ephemeral in-memory store, handy for previews and tests.
    pub fn in_memory(namespace: &str) -> Self {
        Self::new(Arc::new(LocalStorage::default()), namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    fn catalog_key(&self) -> String {
        format!("{}:catalog", self.namespace)
    }

    fn assignments_prefix(&self) -> String {
        format!("{}:assignments:", self.namespace)
    }

    fn assignments_key(&self, visitor_id: &str) -> String {
        format!("{}{}", self.assignments_prefix(), visitor_id)
    }

    /// Load the full state. Never fails: storage errors and corrupted
    /// payloads degrade to empty state.
    pub fn load(&self) -> CatalogState {
        let mut state = CatalogState::default();

        if let Some(experiments) = self.read_json::<Catalog>(&self.catalog_key()) {
            state.experiments = experiments;
        }

        let prefix = self.assignments_prefix();
        let keys = match self.backend.keys(&prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list stored assignments, starting without them");
                Vec::new()
            }
        };
        for key in keys {
            let Some(visitor_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(map) = self.read_json::<VisitorAssignments>(&key) {
                if !map.is_empty() {
                    state.assignments.insert(visitor_id.to_string(), map);
                }
            }
        }

        debug!(
            experiments = state.experiments.len(),
            visitors = state.assignments.len(),
            "Loaded experiment state"
        );
        state
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = key, error = %e, "Storage read failed, treating as empty");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                metrics::counter!("store.corrupt_payloads").increment(1);
                warn!(key = key, error = %e, "Discarding corrupted stored payload");
                if let Err(e) = self.backend.remove(key) {
                    warn!(key = key, error = %e, "Failed to remove corrupted payload");
                }
                None
            }
        }
    }

    /// Persist the full state, removing visitor maps that no longer exist.
    pub fn save(&self, state: &CatalogState) -> SplitlaneResult<()> {
        self.save_catalog(&state.experiments)?;
        for (visitor_id, map) in &state.assignments {
            self.save_assignments(visitor_id, map)?;
        }
        for key in self.backend.keys(&self.assignments_prefix())? {
            let stale = key
                .strip_prefix(&self.assignments_prefix())
                .is_some_and(|visitor| !state.assignments.contains_key(visitor));
            if stale {
                self.backend.remove(&key)?;
            }
        }
        Ok(())
    }

    pub fn save_catalog(&self, experiments: &Catalog) -> SplitlaneResult<()> {
        self.write_json(&self.catalog_key(), experiments)
    }

    /// Persist one visitor's assignments; an empty map removes the key.
    pub fn save_assignments(
        &self,
        visitor_id: &str,
        assignments: &VisitorAssignments,
    ) -> SplitlaneResult<()> {
        let key = self.assignments_key(visitor_id);
        if assignments.is_empty() {
            return self.backend.remove(&key);
        }
        self.write_json(&key, assignments)
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> SplitlaneResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.set(key, &json).inspect_err(|_| {
            metrics::counter!("store.write_errors").increment(1);
        })
    }

    /// Remove every key under this namespace.
    pub fn clear(&self) -> SplitlaneResult<()> {
        for key in self.backend.keys(&format!("{}:", self.namespace))? {
            self.backend.remove(&key)?;
        }
        Ok(())
    }
}
