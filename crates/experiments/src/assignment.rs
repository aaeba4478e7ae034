//! Assignment engine — decides which variant a visitor sees and keeps that
//! decision sticky for the configured test duration.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use splitlane_core::types::{AssignmentEntry, SelectionMode};
use splitlane_core::{CatalogState, EventKind, Experiment};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::ExperimentEngine;

/// Session-scoped pseudo-identity of the browsing visitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visitor {
    pub id: String,
}

impl Visitor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Fresh random identity for a first-time visitor.
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

/// Result of a forced assignment. `previous` is what the visitor had before,
/// so the render layer can drop whatever it displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForcedAssignment {
    pub experiment_id: String,
    pub variant_id: String,
    pub previous: Option<String>,
}

impl ForcedAssignment {
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.variant_id.as_str())
    }
}

/// Pick a variant for a new assignment. Returns `None` only for an
/// experiment without variants.
pub fn select_variant<R: Rng>(experiment: &Experiment, rng: &mut R) -> Option<String> {
    let ids: Vec<&String> = experiment.variants.keys().collect();
    if ids.is_empty() {
        return None;
    }

    let index = match experiment.selection {
        SelectionMode::Uniform => rng.gen_range(0..ids.len()),
        SelectionMode::Weighted => {
            let weights = experiment.variants.values().map(|v| v.weight);
            match WeightedIndex::new(weights) {
                Ok(dist) => dist.sample(rng),
                Err(e) => {
                    warn!(error = %e, "Invalid variant weights, falling back to uniform selection");
                    rng.gen_range(0..ids.len())
                }
            }
        }
    };
    Some(ids[index].clone())
}

/// The visitor's stored variant when it is still usable: inside the expiry
/// window and pointing at a variant the catalog still declares.
pub fn existing_assignment<'a>(
    state: &'a CatalogState,
    visitor_id: &str,
    experiment_id: &str,
    now: DateTime<Utc>,
    ttl: Option<Duration>,
) -> Option<&'a str> {
    let experiment = state.experiments.get(experiment_id)?;
    let entry = state.assignment(visitor_id, experiment_id)?;
    if entry.is_expired(now, ttl) {
        debug!(
            experiment_id = experiment_id,
            visitor_id = visitor_id,
            "Stored assignment expired"
        );
        return None;
    }
    if !experiment.has_variant(&entry.variant) {
        debug!(
            experiment_id = experiment_id,
            variant_id = %entry.variant,
            "Stored assignment references a retired variant"
        );
        return None;
    }
    Some(entry.variant.as_str())
}

impl ExperimentEngine {
    /// Resolve the active variant of `experiment_id` for `visitor`, creating
    /// and persisting a new assignment when none is usable.
    ///
    /// Resolution never records an impression; the caller logs one when it
    /// actually renders the variant.
    pub fn resolve(&mut self, experiment_id: &str, visitor: &Visitor) -> Option<String> {
        let Some(experiment) = self.state.experiments.get(experiment_id) else {
            warn!(experiment_id = experiment_id, "Resolve requested for unknown experiment");
            return None;
        };

        let now = Utc::now();
        let ttl = self.config.assignment.ttl();
        if let Some(variant_id) =
            existing_assignment(&self.state, &visitor.id, experiment_id, now, ttl)
        {
            return Some(variant_id.to_string());
        }

        let variant_id = select_variant(experiment, &mut self.rng)?;
        self.state
            .assignments
            .entry(visitor.id.clone())
            .or_default()
            .insert(
                experiment_id.to_string(),
                AssignmentEntry::new(variant_id.clone(), now),
            );
        self.flush_visitor(&visitor.id);

        metrics::counter!("experiments.assignments").increment(1);
        debug!(
            experiment_id = experiment_id,
            variant_id = %variant_id,
            visitor_id = %visitor.id,
            "Visitor assigned"
        );
        self.notify(
            EventKind::Assignment,
            experiment_id,
            Some(&variant_id),
            Some(&visitor.id),
        );
        Some(variant_id)
    }

    /// The visitor's stored variant without creating one.
    pub fn current_assignment(&self, experiment_id: &str, visitor: &Visitor) -> Option<&str> {
        existing_assignment(
            &self.state,
            &visitor.id,
            experiment_id,
            Utc::now(),
            self.config.assignment.ttl(),
        )
    }

    /// Override the visitor's assignment (QA and preview links). Unknown
    /// experiment or variant ids leave state untouched and return `None`.
    pub fn force_variant(
        &mut self,
        experiment_id: &str,
        variant_id: &str,
        visitor: &Visitor,
    ) -> Option<ForcedAssignment> {
        let Some(experiment) = self.state.experiments.get(experiment_id) else {
            warn!(experiment_id = experiment_id, "Force requested for unknown experiment");
            return None;
        };
        if !experiment.has_variant(variant_id) {
            warn!(
                experiment_id = experiment_id,
                variant_id = variant_id,
                "Force requested for unknown variant"
            );
            return None;
        }

        let previous = self
            .state
            .assignments
            .entry(visitor.id.clone())
            .or_default()
            .insert(
                experiment_id.to_string(),
                AssignmentEntry::new(variant_id, Utc::now()),
            )
            .map(|entry| entry.variant);
        self.flush_visitor(&visitor.id);

        info!(
            experiment_id = experiment_id,
            variant_id = variant_id,
            visitor_id = %visitor.id,
            "Variant forced"
        );
        self.notify(
            EventKind::ForcedAssignment,
            experiment_id,
            Some(variant_id),
            Some(&visitor.id),
        );

        Some(ForcedAssignment {
            experiment_id: experiment_id.to_string(),
            variant_id: variant_id.to_string(),
            previous,
        })
    }
}
