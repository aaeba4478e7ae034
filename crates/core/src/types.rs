use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Experiments keyed by name.
pub type Catalog = BTreeMap<String, Experiment>;

/// One visitor's assignments keyed by experiment name.
pub type VisitorAssignments = BTreeMap<String, AssignmentEntry>;

// ─── Experiments ────────────────────────────────────────────────────────

/// How a new visitor is placed into one of an experiment's variants.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Equal probability across all declared variants.
    #[default]
    Uniform,
    /// Probability proportional to each variant's weight.
    Weighted,
}

/// A named test comparing two or more content variants.
///
/// The experiment name is the key under which it lives in the [`Catalog`];
/// it is not repeated inside the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub variants: BTreeMap<String, Variant>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub selection: SelectionMode,
}

impl Experiment {
    pub fn new(start_date: DateTime<Utc>, selection: SelectionMode) -> Self {
        Self {
            variants: BTreeMap::new(),
            start_date,
            selection,
        }
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.get(variant_id)
    }

    pub fn has_variant(&self, variant_id: &str) -> bool {
        self.variants.contains_key(variant_id)
    }

    /// Aggregate counters across every variant.
    pub fn totals(&self) -> Totals {
        self.variants.values().fold(Totals::default(), |acc, v| Totals {
            impressions: acc.impressions + v.impressions,
            clicks: acc.clicks + v.clicks,
            conversions: acc.conversions + v.conversions,
        })
    }

    /// Zero every counter and restart the experiment clock. Variants and
    /// their copy survive so the page keeps rendering.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        for variant in self.variants.values_mut() {
            variant.impressions = 0;
            variant.clicks = 0;
            variant.conversions = 0;
        }
        self.start_date = now;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
}

/// One concrete alternative inside an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub copy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub conversions: u64,
}

impl Variant {
    pub fn new(copy: impl Into<String>) -> Self {
        Self {
            copy: copy.into(),
            style: None,
            weight: default_weight(),
            impressions: 0,
            clicks: 0,
            conversions: 0,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

// ─── Assignments ────────────────────────────────────────────────────────

/// A visitor's stored variant for one experiment.
///
/// Older payloads store a bare variant id; those decode with no timestamp
/// and never expire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "StoredAssignment", rename_all = "camelCase")]
pub struct AssignmentEntry {
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAssignment {
    Bare(String),
    #[serde(rename_all = "camelCase")]
    Timestamped {
        variant: String,
        #[serde(default)]
        assigned_at: Option<DateTime<Utc>>,
    },
}

impl From<StoredAssignment> for AssignmentEntry {
    fn from(stored: StoredAssignment) -> Self {
        match stored {
            StoredAssignment::Bare(variant) => Self {
                variant,
                assigned_at: None,
            },
            StoredAssignment::Timestamped {
                variant,
                assigned_at,
            } => Self {
                variant,
                assigned_at,
            },
        }
    }
}

impl AssignmentEntry {
    pub fn new(variant: impl Into<String>, assigned_at: DateTime<Utc>) -> Self {
        Self {
            variant: variant.into(),
            assigned_at: Some(assigned_at),
        }
    }

    /// `ttl = None` means assignments never expire.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> bool {
        match (ttl, self.assigned_at) {
            (Some(ttl), Some(at)) => now - at > ttl,
            _ => false,
        }
    }
}

// ─── Persisted state ────────────────────────────────────────────────────

/// Everything the persistence store owns: the catalog plus every visitor's
/// assignment map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogState {
    #[serde(default)]
    pub experiments: Catalog,
    #[serde(default)]
    pub assignments: BTreeMap<String, VisitorAssignments>,
}

impl CatalogState {
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.assignments.is_empty()
    }

    pub fn assignment(&self, visitor_id: &str, experiment_id: &str) -> Option<&AssignmentEntry> {
        self.assignments.get(visitor_id)?.get(experiment_id)
    }

    /// Drop one experiment's assignment from every visitor.
    pub fn clear_assignments_for(&mut self, experiment_id: &str) -> usize {
        let mut cleared = 0;
        for visitor in self.assignments.values_mut() {
            if visitor.remove(experiment_id).is_some() {
                cleared += 1;
            }
        }
        self.assignments.retain(|_, v| !v.is_empty());
        cleared
    }
}
