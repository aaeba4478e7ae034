//! Event tracker — write-through impression, click, and conversion counters.
//!
//! Increments are at-least-once: repeated calls count repeatedly. A failed
//! flush leaves the in-memory counter updated and is only logged.

use serde::{Deserialize, Serialize};
use splitlane_core::types::Catalog;
use splitlane_core::{EventKind, SplitlaneError, SplitlaneResult};
use std::fmt;
use tracing::{debug, warn};

use crate::assignment::Visitor;
use crate::engine::ExperimentEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Impressions,
    Clicks,
    Conversions,
}

impl Counter {
    fn event_kind(self) -> EventKind {
        match self {
            Counter::Impressions => EventKind::Impression,
            Counter::Clicks => EventKind::Click,
            Counter::Conversions => EventKind::Conversion,
        }
    }

    fn record_metric(self) {
        match self {
            Counter::Impressions => metrics::counter!("experiments.impressions").increment(1),
            Counter::Clicks => metrics::counter!("experiments.clicks").increment(1),
            Counter::Conversions => metrics::counter!("experiments.conversions").increment(1),
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Counter::Impressions => write!(f, "impressions"),
            Counter::Clicks => write!(f, "clicks"),
            Counter::Conversions => write!(f, "conversions"),
        }
    }
}

/// Bump one counter by exactly one and return its new value.
pub fn increment(
    catalog: &mut Catalog,
    experiment_id: &str,
    variant_id: &str,
    counter: Counter,
) -> SplitlaneResult<u64> {
    let experiment = catalog
        .get_mut(experiment_id)
        .ok_or_else(|| SplitlaneError::UnknownExperiment(experiment_id.to_string()))?;
    let variant =
        experiment
            .variants
            .get_mut(variant_id)
            .ok_or_else(|| SplitlaneError::UnknownVariant {
                experiment_id: experiment_id.to_string(),
                variant_id: variant_id.to_string(),
            })?;

    let slot = match counter {
        Counter::Impressions => &mut variant.impressions,
        Counter::Clicks => &mut variant.clicks,
        Counter::Conversions => &mut variant.conversions,
    };
    *slot = slot.saturating_add(1);
    Ok(*slot)
}

impl ExperimentEngine {
    /// Count one rendered impression. Returns `false` for unknown ids.
    pub fn record_impression(&mut self, experiment_id: &str, variant_id: &str) -> bool {
        self.track(experiment_id, variant_id, Counter::Impressions, None)
    }

    pub fn record_click(&mut self, experiment_id: &str, variant_id: &str) -> bool {
        self.track(experiment_id, variant_id, Counter::Clicks, None)
    }

    /// Count a conversion against the visitor's current assignment. A
    /// visitor without one is a logged no-op.
    pub fn record_conversion(&mut self, experiment_id: &str, visitor: &Visitor) -> bool {
        let Some(variant_id) = self
            .current_assignment(experiment_id, visitor)
            .map(str::to_string)
        else {
            warn!(
                experiment_id = experiment_id,
                visitor_id = %visitor.id,
                "Conversion without an assignment ignored"
            );
            return false;
        };
        self.track(
            experiment_id,
            &variant_id,
            Counter::Conversions,
            Some(&visitor.id),
        )
    }

    /// Count a conversion against an explicit variant.
    pub fn record_conversion_for(&mut self, experiment_id: &str, variant_id: &str) -> bool {
        self.track(experiment_id, variant_id, Counter::Conversions, None)
    }

    fn track(
        &mut self,
        experiment_id: &str,
        variant_id: &str,
        counter: Counter,
        visitor_id: Option<&str>,
    ) -> bool {
        let value = match increment(&mut self.state.experiments, experiment_id, variant_id, counter)
        {
            Ok(value) => value,
            Err(e) => {
                warn!(counter = %counter, error = %e, "Tracking call ignored");
                return false;
            }
        };

        self.flush_catalog();
        counter.record_metric();
        debug!(
            experiment_id = experiment_id,
            variant_id = variant_id,
            counter = %counter,
            value = value,
            "Event recorded"
        );
        self.notify(
            counter.event_kind(),
            experiment_id,
            Some(variant_id),
            visitor_id,
        );
        true
    }
}
