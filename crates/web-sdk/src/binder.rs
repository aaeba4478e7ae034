//! Page binder — owns the engine for one page lifetime and couples the
//! render layer to it.
//!
//! An impression is logged when a variant is actually rendered, at most
//! once per experiment per render cycle, so repeated lookups between
//! re-renders do not inflate impressions.

use serde::{Deserialize, Serialize};
use splitlane_experiments::{
    Declaration, DiscoveryReport, ExperimentEngine, ForcedAssignment, Visitor,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::declarations::{scan_elements, MarkupElement};

/// Query parameter carrying preview overrides: `ab_force=exp:variant,...`.
pub const PREVIEW_PARAM: &str = "ab_force";

/// What the render layer should display for one experiment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedVariant {
    pub experiment_id: String,
    pub variant_id: String,
    pub copy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

pub struct PageBinder {
    engine: ExperimentEngine,
    visitor: Visitor,
    /// Slots rendered in the current cycle, experiment → variant.
    rendered: HashMap<String, String>,
    cycle: u64,
}

impl PageBinder {
    pub fn new(engine: ExperimentEngine, visitor: Visitor) -> Self {
        Self {
            engine,
            visitor,
            rendered: HashMap::new(),
            cycle: 0,
        }
    }

    pub fn engine(&self) -> &ExperimentEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ExperimentEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> ExperimentEngine {
        self.engine
    }

    pub fn visitor(&self) -> &Visitor {
        &self.visitor
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Register the experiments declared on the page.
    pub fn discover(&mut self, elements: &[MarkupElement]) -> DiscoveryReport {
        let declarations: Vec<Declaration> = scan_elements(elements);
        self.engine.discover(&declarations)
    }

    /// Start a new render pass; every slot may log one impression again.
    pub fn begin_render_cycle(&mut self) {
        self.rendered.clear();
        self.cycle += 1;
        debug!(cycle = self.cycle, "Render cycle started");
    }

    /// Resolve the visitor's variant for `experiment_id` and return what to
    /// display. The first render of a slot in a cycle logs the impression.
    pub fn render(&mut self, experiment_id: &str) -> Option<RenderedVariant> {
        let variant_id = self.engine.resolve(experiment_id, &self.visitor)?;

        if self.rendered.get(experiment_id) != Some(&variant_id) {
            self.engine.record_impression(experiment_id, &variant_id);
            self.rendered
                .insert(experiment_id.to_string(), variant_id.clone());
        }

        let variant = self.engine.experiment(experiment_id)?.variant(&variant_id)?;
        Some(RenderedVariant {
            experiment_id: experiment_id.to_string(),
            copy: variant.copy.clone(),
            style: variant.style.clone(),
            variant_id,
        })
    }

    /// Variant currently displayed in the slot, if rendered this cycle.
    pub fn rendered_variant(&self, experiment_id: &str) -> Option<&str> {
        self.rendered.get(experiment_id).map(String::as_str)
    }

    /// Count a click on the experiment's element. Clicks attribute to the
    /// displayed variant, falling back to the stored assignment.
    pub fn on_click(&mut self, experiment_id: &str) -> bool {
        let variant_id = match self.rendered.get(experiment_id) {
            Some(variant_id) => variant_id.clone(),
            None => match self.engine.current_assignment(experiment_id, &self.visitor) {
                Some(variant_id) => variant_id.to_string(),
                None => {
                    warn!(
                        experiment_id = experiment_id,
                        "Click on an experiment that was never rendered"
                    );
                    return false;
                }
            },
        };
        self.engine.record_click(experiment_id, &variant_id)
    }

    pub fn on_conversion(&mut self, experiment_id: &str) -> bool {
        self.engine.record_conversion(experiment_id, &self.visitor)
    }

    /// Force a variant for this visitor and invalidate the rendered slot so
    /// the next `render` displays and counts the forced variant.
    pub fn force_variant(
        &mut self,
        experiment_id: &str,
        variant_id: &str,
    ) -> Option<ForcedAssignment> {
        let forced = self
            .engine
            .force_variant(experiment_id, variant_id, &self.visitor)?;
        self.rendered.remove(experiment_id);
        Some(forced)
    }

    /// Apply `ab_force` overrides from a page URL. Malformed URLs and
    /// entries are logged and skipped.
    pub fn apply_preview_url(&mut self, page_url: &str) -> Vec<ForcedAssignment> {
        let overrides = match preview_overrides(page_url) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!(url = page_url, error = %e, "Ignoring unparsable preview URL");
                return Vec::new();
            }
        };

        let applied: Vec<ForcedAssignment> = overrides
            .iter()
            .filter_map(|(experiment_id, variant_id)| self.force_variant(experiment_id, variant_id))
            .collect();
        if !applied.is_empty() {
            info!(
                visitor_id = %self.visitor.id,
                forced = applied.len(),
                "Preview overrides applied"
            );
        }
        applied
    }
}

/// Extract `(experiment, variant)` pairs from every `ab_force` parameter.
pub fn preview_overrides(page_url: &str) -> Result<Vec<(String, String)>, url::ParseError> {
    let url = Url::parse(page_url)?;
    let mut overrides = Vec::new();
    for (key, value) in url.query_pairs() {
        if key != PREVIEW_PARAM {
            continue;
        }
        for entry in value.split(',') {
            match entry.split_once(':') {
                Some((experiment, variant))
                    if !experiment.trim().is_empty() && !variant.trim().is_empty() =>
                {
                    overrides.push((experiment.trim().to_string(), variant.trim().to_string()));
                }
                _ => warn!(entry = entry, "Skipping malformed preview override"),
            }
        }
    }
    Ok(overrides)
}
