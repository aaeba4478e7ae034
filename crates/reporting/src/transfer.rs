//! Portable export/import of the whole experiment state, for backups and
//! for moving a running test between environments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitlane_core::types::{Catalog, VisitorAssignments};
use splitlane_core::{CatalogState, SplitlaneResult};
use splitlane_experiments::{ExperimentEngine, MergeSummary};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub experiments: Catalog,
    #[serde(default)]
    pub assignments: BTreeMap<String, VisitorAssignments>,
}

fn default_version() -> u32 {
    EXPORT_VERSION
}

impl ExportDocument {
    pub fn to_json(&self) -> SplitlaneResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SplitlaneResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn into_state(self) -> CatalogState {
        CatalogState {
            experiments: self.experiments,
            assignments: self.assignments,
        }
    }
}

/// Snapshot the engine's catalog and assignments.
pub fn export_data(engine: &ExperimentEngine) -> ExportDocument {
    let state = engine.state();
    let document = ExportDocument {
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        experiments: state.experiments.clone(),
        assignments: state.assignments.clone(),
    };
    info!(
        experiments = document.experiments.len(),
        visitors = document.assignments.len(),
        "Experiment state exported"
    );
    document
}

/// Merge an export into the engine, overwriting experiments and
/// assignments with matching ids.
pub fn import_data(engine: &mut ExperimentEngine, document: ExportDocument) -> MergeSummary {
    if document.version > EXPORT_VERSION {
        warn!(
            version = document.version,
            supported = EXPORT_VERSION,
            "Importing export from a newer format version"
        );
    }
    let exported_at = document.exported_at;
    let summary = engine.merge_state(document.into_state());
    info!(
        exported_at = %exported_at,
        experiments = summary.experiments,
        assignments = summary.assignments,
        "Experiment state imported"
    );
    summary
}

/// Parse and merge a JSON export. Unparsable input is returned as an error
/// and leaves the engine untouched.
pub fn import_json(engine: &mut ExperimentEngine, json: &str) -> SplitlaneResult<MergeSummary> {
    let document = ExportDocument::from_json(json)?;
    Ok(import_data(engine, document))
}
