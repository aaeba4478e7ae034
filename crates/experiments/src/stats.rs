//! Statistics engine — per-variant CTR and CVR, ranking, and the
//! minimum-sample winner gate.
//!
//! The confidence label is a click-count heuristic. It is not a p-value or
//! a confidence interval and must not be presented as one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitlane_core::config::StatisticsConfig;
use splitlane_core::types::Totals;
use splitlane_core::Experiment;
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, warn};

use crate::engine::ExperimentEngine;

/// Coarse label derived from total clicks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
}

impl Confidence {
    pub fn from_clicks(total_clicks: u64, high_confidence_clicks: u64) -> Self {
        if total_clicks >= high_confidence_clicks {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "High"),
            Confidence::Medium => write!(f, "Medium"),
        }
    }
}

/// One variant's derived tracking record and its position in the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantStanding {
    /// 1-based.
    pub rank: usize,
    pub variant_id: String,
    pub copy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub ctr: f64,
    pub cvr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub variant_id: String,
    pub copy: String,
    pub cvr: f64,
    /// Relative CVR lift over the runner-up; absent when fewer than two
    /// variants have clicks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement: Option<f64>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub experiment_id: String,
    pub start_date: DateTime<Utc>,
    pub totals: Totals,
    pub min_sample_size: u64,
    /// Ranked best first.
    pub variants: Vec<VariantStanding>,
    pub winner: Option<Winner>,
    /// Clicks still missing before a winner can be declared; 0 once the
    /// sample gate is met.
    pub clicks_needed: u64,
    pub message: String,
}

impl EvaluationResult {
    pub fn has_winner(&self) -> bool {
        self.winner.is_some()
    }

    pub fn standing(&self, variant_id: &str) -> Option<&VariantStanding> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Descending CVR, then more clicks, then variant id for a stable order.
fn compare_standings(a: &VariantStanding, b: &VariantStanding) -> Ordering {
    b.cvr
        .total_cmp(&a.cvr)
        .then_with(|| b.clicks.cmp(&a.clicks))
        .then_with(|| a.variant_id.cmp(&b.variant_id))
}

/// Relative lift of the winner over the runner-up. `None` unless at least
/// two variants have recorded clicks.
fn improvement(standings: &[VariantStanding]) -> Option<f64> {
    if standings.iter().filter(|s| s.clicks > 0).count() < 2 {
        return None;
    }
    let winner = standings.first()?;
    let runner_up = standings.get(1)?;
    if winner.cvr == 0.0 {
        return Some(0.0);
    }
    Some((winner.cvr - runner_up.cvr) / winner.cvr)
}

/// Compute the full result for one experiment. Pure; never touches storage.
pub fn evaluate(
    experiment_id: &str,
    experiment: &Experiment,
    config: &StatisticsConfig,
) -> EvaluationResult {
    let totals = experiment.totals();

    let mut variants: Vec<VariantStanding> = experiment
        .variants
        .iter()
        .map(|(id, v)| VariantStanding {
            rank: 0,
            variant_id: id.clone(),
            copy: v.copy.clone(),
            style: v.style.clone(),
            impressions: v.impressions,
            clicks: v.clicks,
            conversions: v.conversions,
            ctr: ratio(v.clicks, v.impressions),
            cvr: ratio(v.conversions, v.clicks),
        })
        .collect();
    variants.sort_by(compare_standings);
    for (index, standing) in variants.iter_mut().enumerate() {
        standing.rank = index + 1;
    }

    let clicks_needed = config.min_sample_size.saturating_sub(totals.clicks);
    let winner = match variants.first() {
        Some(top) if clicks_needed == 0 => Some(Winner {
            variant_id: top.variant_id.clone(),
            copy: top.copy.clone(),
            cvr: top.cvr,
            improvement: improvement(&variants),
            confidence: Confidence::from_clicks(totals.clicks, config.high_confidence_clicks),
        }),
        _ => None,
    };

    let message = match &winner {
        Some(w) => winner_message(w),
        None if clicks_needed > 0 => format!(
            "Need {} more {} to determine a winner",
            clicks_needed,
            if clicks_needed == 1 { "click" } else { "clicks" }
        ),
        None => "No variants to evaluate".to_string(),
    };

    EvaluationResult {
        experiment_id: experiment_id.to_string(),
        start_date: experiment.start_date,
        totals,
        min_sample_size: config.min_sample_size,
        variants,
        winner,
        clicks_needed,
        message,
    }
}

fn winner_message(winner: &Winner) -> String {
    let mut message = format!(
        "Variant {} (\"{}\") is winning with {:.1}% conversion rate",
        winner.variant_id,
        winner.copy,
        winner.cvr * 100.0
    );
    if let Some(lift) = winner.improvement {
        message.push_str(&format!(", {:.1}% better than the runner-up", lift * 100.0));
    }
    message.push_str(&format!(" ({} confidence)", winner.confidence));
    message
}

impl ExperimentEngine {
    /// Evaluate one experiment. Unknown ids log a warning and return `None`.
    pub fn evaluate(&self, experiment_id: &str) -> Option<EvaluationResult> {
        let Some(experiment) = self.state.experiments.get(experiment_id) else {
            warn!(experiment_id = experiment_id, "Evaluation requested for unknown experiment");
            return None;
        };
        let result = evaluate(experiment_id, experiment, &self.config.statistics);
        debug!(
            experiment_id = experiment_id,
            total_clicks = result.totals.clicks,
            winner = result.winner.as_ref().map(|w| w.variant_id.as_str()),
            "Experiment evaluated"
        );
        Some(result)
    }

    /// Operator-facing alias of [`ExperimentEngine::evaluate`].
    pub fn get_results(&self, experiment_id: &str) -> Option<EvaluationResult> {
        self.evaluate(experiment_id)
    }

    /// Results for every experiment, ordered by experiment id.
    pub fn get_all_results(&self) -> Vec<EvaluationResult> {
        self.state
            .experiments
            .iter()
            .map(|(id, experiment)| evaluate(id, experiment, &self.config.statistics))
            .collect()
    }
}
