//! The engine instance. Holds the catalog and assignment maps for one page
//! lifetime and writes every mutation straight through to the persistence
//! store.
//!
//! Component operations live next to their logic: discovery in
//! [`crate::registry`], resolution in [`crate::assignment`], counters in
//! [`crate::tracker`], and evaluation in [`crate::stats`].

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use splitlane_core::event_bus::{make_event, noop_sink};
use splitlane_core::{
    CatalogState, EngineConfig, EventKind, EventSink, Experiment, SplitlaneResult,
};
use splitlane_store::PersistenceStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ExperimentEngine {
    pub(crate) config: EngineConfig,
    pub(crate) store: PersistenceStore,
    pub(crate) state: CatalogState,
    pub(crate) rng: StdRng,
    event_sink: Arc<dyn EventSink>,
}

/// Outcome of merging an imported state into the live one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub experiments: usize,
    pub assignments: usize,
}

impl ExperimentEngine {
    /// Create an engine over `store`, loading whatever state it holds.
    pub fn new(config: EngineConfig, store: PersistenceStore) -> Self {
        let state = store.load();
        info!(
            namespace = store.namespace(),
            experiments = state.experiments.len(),
            visitors = state.assignments.len(),
            "Experiment engine initialized"
        );
        Self {
            config,
            store,
            state,
            rng: StdRng::from_entropy(),
            event_sink: noop_sink(),
        }
    }

    /// Open the storage backend named in `config` and load from it.
    pub fn open(config: EngineConfig) -> SplitlaneResult<Self> {
        let store = PersistenceStore::open(&config.storage, &config.namespace)?;
        Ok(Self::new(config, store))
    }

    /// Attach an outbound sink for tracked events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Replace the selection RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    pub fn experiment(&self, experiment_id: &str) -> Option<&Experiment> {
        self.state.experiments.get(experiment_id)
    }

    pub fn experiment_ids(&self) -> Vec<String> {
        self.state.experiments.keys().cloned().collect()
    }

    /// Re-read the store, picking up writes made by other engine instances
    /// over the same backend.
    pub fn reload(&mut self) {
        self.state = self.store.load();
    }

    /// Zero counters and drop assignments for one experiment, or for all of
    /// them when `experiment_id` is `None`. Returns how many experiments
    /// were reset.
    pub fn reset_test(&mut self, experiment_id: Option<&str>) -> usize {
        let now = Utc::now();
        let ids: Vec<String> = match experiment_id {
            Some(id) if self.state.experiments.contains_key(id) => vec![id.to_string()],
            Some(id) => {
                warn!(experiment_id = id, "Reset requested for unknown experiment");
                return 0;
            }
            None => self.experiment_ids(),
        };

        for id in &ids {
            if let Some(experiment) = self.state.experiments.get_mut(id) {
                experiment.reset(now);
            }
            let cleared = self.state.clear_assignments_for(id);
            debug!(experiment_id = %id, cleared_assignments = cleared, "Experiment reset");
        }
        if experiment_id.is_none() {
            self.state.assignments.clear();
        }

        self.flush_all();
        for id in &ids {
            self.notify(EventKind::Reset, id, None, None);
        }
        info!(reset = ids.len(), "Experiments reset");
        ids.len()
    }

    /// Merge `incoming` into the live state. Experiments with matching ids
    /// are replaced wholesale; assignments are merged per visitor with
    /// incoming entries winning.
    pub fn merge_state(&mut self, incoming: CatalogState) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for (id, experiment) in incoming.experiments {
            if experiment.variants.is_empty() {
                warn!(experiment_id = %id, "Skipping imported experiment without variants");
                continue;
            }
            self.state.experiments.insert(id, experiment);
            summary.experiments += 1;
        }
        for (visitor_id, assignments) in incoming.assignments {
            summary.assignments += assignments.len();
            self.state
                .assignments
                .entry(visitor_id)
                .or_default()
                .extend(assignments);
        }

        self.flush_all();
        info!(
            experiments = summary.experiments,
            assignments = summary.assignments,
            "Merged imported experiment state"
        );
        summary
    }

    // ─── Write-through helpers ──────────────────────────────────────────

    pub(crate) fn flush_catalog(&self) {
        if let Err(e) = self.store.save_catalog(&self.state.experiments) {
            warn!(error = %e, "Failed to persist experiment catalog; continuing in memory");
        }
    }

    pub(crate) fn flush_visitor(&self, visitor_id: &str) {
        let empty = Default::default();
        let assignments = self.state.assignments.get(visitor_id).unwrap_or(&empty);
        if let Err(e) = self.store.save_assignments(visitor_id, assignments) {
            warn!(
                visitor_id = visitor_id,
                error = %e,
                "Failed to persist assignments; continuing in memory"
            );
        }
    }

    pub(crate) fn flush_all(&self) {
        if let Err(e) = self.store.save(&self.state) {
            warn!(error = %e, "Failed to persist experiment state; continuing in memory");
        }
    }

    /// Forward an event to the outbound sink. Sink failures are logged only.
    pub(crate) fn notify(
        &self,
        kind: EventKind,
        experiment_id: &str,
        variant_id: Option<&str>,
        visitor_id: Option<&str>,
    ) {
        let event = make_event(
            kind,
            experiment_id,
            variant_id.map(str::to_string),
            visitor_id.map(str::to_string),
        );
        if let Err(e) = self.event_sink.emit(event) {
            warn!(
                kind = ?kind,
                experiment_id = experiment_id,
                error = %e,
                "Outbound event sink failed"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::Declaration;
    use crate::Visitor;
    use splitlane_core::event_bus::capture_sink;
    use splitlane_store::{LocalStorage, StorageBackend};

    fn engine_with_cta() -> ExperimentEngine {
        let mut engine =
            ExperimentEngine::new(EngineConfig::default(), PersistenceStore::in_memory("test"))
                .with_rng(StdRng::seed_from_u64(7));
        engine.discover(&[
            Declaration::new("cta-test", "A").with_copy("Start Free"),
            Declaration::new("cta-test", "B").with_copy("Try Now"),
            Declaration::new("hero", "short").with_copy("Ship faster"),
        ]);
        engine
    }

    #[test]
    fn test_new_engine_on_empty_store() {
        let engine =
            ExperimentEngine::new(EngineConfig::default(), PersistenceStore::in_memory("test"));
        assert!(engine.state().is_empty());
        assert!(engine.experiment("cta-test").is_none());
    }

    #[test]
    fn test_reset_single_experiment() {
        let mut engine = engine_with_cta();
        let visitor = Visitor::new("visitor-1");
        engine.resolve("cta-test", &visitor).unwrap();
        engine.resolve("hero", &visitor).unwrap();
        engine.record_click("cta-test", "A");
        engine.record_click("hero", "short");

        assert_eq!(engine.reset_test(Some("cta-test")), 1);

        assert_eq!(engine.experiment("cta-test").unwrap().totals().clicks, 0);
        assert_eq!(engine.experiment("hero").unwrap().totals().clicks, 1);
        assert!(engine.state().assignment("visitor-1", "cta-test").is_none());
        assert!(engine.state().assignment("visitor-1", "hero").is_some());
    }

    #[test]
    fn test_reset_all_experiments() {
        let mut engine = engine_with_cta();
        let visitor = Visitor::new("visitor-1");
        engine.resolve("cta-test", &visitor).unwrap();
        engine.record_impression("hero", "short");

        assert_eq!(engine.reset_test(None), 2);
        assert!(engine.state().assignments.is_empty());
        assert_eq!(engine.experiment("hero").unwrap().totals().impressions, 0);
        assert_eq!(engine.experiment_ids().len(), 2);
    }

    #[test]
    fn test_reset_unknown_experiment_is_noop() {
        let mut engine = engine_with_cta();
        engine.record_click("cta-test", "A");
        assert_eq!(engine.reset_test(Some("missing")), 0);
        assert_eq!(engine.experiment("cta-test").unwrap().totals().clicks, 1);
    }

    #[test]
    fn test_reset_emits_events() {
        let sink = capture_sink();
        let mut engine = engine_with_cta().with_event_sink(sink.clone());
        engine.reset_test(None);
        assert_eq!(sink.count_kind(EventKind::Reset), 2);
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: splitlane_core::ExperimentEvent) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("analytics endpoint unreachable"))
        }
    }

    #[test]
    fn test_failing_sink_leaves_state_and_persistence_intact() {
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::default());
        let store = || PersistenceStore::new(backend.clone(), "test");
        let mut engine = ExperimentEngine::new(EngineConfig::default(), store())
            .with_event_sink(Arc::new(FailingSink));
        engine.discover(&[
            Declaration::new("cta-test", "A").with_copy("Start Free"),
            Declaration::new("cta-test", "B").with_copy("Try Now"),
        ]);
        let visitor = Visitor::new("visitor-1");

        let assigned = engine.resolve("cta-test", &visitor).unwrap();
        assert!(engine.record_impression("cta-test", &assigned));
        assert!(engine.record_click("cta-test", "A"));
        let forced = engine.force_variant("cta-test", "B", &visitor).unwrap();
        assert_eq!(forced.variant_id, "B");

        let reloaded = ExperimentEngine::new(EngineConfig::default(), store());
        let totals = reloaded.experiment("cta-test").unwrap().totals();
        assert_eq!(totals.impressions, 1);
        assert_eq!(totals.clicks, 1);
        assert_eq!(
            reloaded.state().assignment("visitor-1", "cta-test").unwrap().variant,
            "B"
        );
    }

    #[test]
    fn test_state_survives_engine_restart() {
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::default());
        {
            let mut engine = ExperimentEngine::new(
                EngineConfig::default(),
                PersistenceStore::new(backend.clone(), "test"),
            );
            engine.discover(&[Declaration::new("cta-test", "A").with_copy("Start Free")]);
            engine.record_impression("cta-test", "A");
            engine.resolve("cta-test", &Visitor::new("visitor-1"));
        }

        let engine =
            ExperimentEngine::new(EngineConfig::default(), PersistenceStore::new(backend, "test"));
        assert_eq!(engine.experiment("cta-test").unwrap().totals().impressions, 1);
        assert_eq!(
            engine.state().assignment("visitor-1", "cta-test").unwrap().variant,
            "A"
        );
    }

    #[test]
    fn test_second_tab_last_write_wins() {
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::default());
        let store = || PersistenceStore::new(backend.clone(), "test");

        let mut first = ExperimentEngine::new(EngineConfig::default(), store());
        first.discover(&[Declaration::new("cta-test", "A").with_copy("Start Free")]);

        let mut second = ExperimentEngine::new(EngineConfig::default(), store());
        first.record_click("cta-test", "A");
        second.record_click("cta-test", "A");

        // Both tabs counted one click from the same baseline; the later write wins.
        let reloaded = ExperimentEngine::new(EngineConfig::default(), store());
        assert_eq!(reloaded.experiment("cta-test").unwrap().totals().clicks, 1);

        first.reload();
        assert_eq!(first.experiment("cta-test").unwrap().totals().clicks, 1);
    }

    #[test]
    fn test_merge_state_overwrites_matching_ids() {
        let mut engine = engine_with_cta();
        engine.record_click("cta-test", "A");

        let mut incoming = CatalogState::default();
        let mut replacement = engine.experiment("cta-test").unwrap().clone();
        replacement.variants.get_mut("A").unwrap().clicks = 42;
        incoming.experiments.insert("cta-test".into(), replacement);
        incoming.experiments.insert(
            "empty".into(),
            Experiment::new(Utc::now(), Default::default()),
        );
        incoming
            .assignments
            .entry("visitor-9".into())
            .or_default()
            .insert(
                "cta-test".into(),
                splitlane_core::AssignmentEntry::new("B", Utc::now()),
            );

        let summary = engine.merge_state(incoming);

        assert_eq!(summary.experiments, 1);
        assert_eq!(summary.assignments, 1);
        assert!(engine.experiment("empty").is_none());
        assert_eq!(engine.experiment("cta-test").unwrap().totals().clicks, 42);
        assert!(engine.experiment("hero").is_some());
        assert_eq!(
            engine.state().assignment("visitor-9", "cta-test").unwrap().variant,
            "B"
        );
    }
}
