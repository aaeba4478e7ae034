//! Test registry — turns experiment declarations from the content layer into
//! catalog entries.
//!
//! Discovery only ever adds: an experiment or variant that already exists is
//! left untouched, so re-running discovery on every page load never resets
//! counters or rewrites copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitlane_core::types::{Catalog, SelectionMode};
use splitlane_core::{Experiment, SplitlaneError, SplitlaneResult, Variant};
use tracing::{info, warn};

use crate::engine::ExperimentEngine;

/// One experiment-bearing element as declared by the content layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    /// Display copy; falls back to `content` when absent.
    #[serde(default)]
    pub copy: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    /// The element's own text.
    #[serde(default)]
    pub content: Option<String>,
}

impl Declaration {
    pub fn new(experiment: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            experiment: Some(experiment.into()),
            variant: Some(variant.into()),
            ..Default::default()
        }
    }

    pub fn with_copy(mut self, copy: impl Into<String>) -> Self {
        self.copy = Some(copy.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Check required fields and return the trimmed experiment and variant ids.
    pub fn validate(&self) -> SplitlaneResult<(&str, &str)> {
        let experiment = non_blank(self.experiment.as_deref()).ok_or_else(|| {
            SplitlaneError::InvalidDeclaration("missing experiment name".to_string())
        })?;
        let variant = non_blank(self.variant.as_deref()).ok_or_else(|| {
            SplitlaneError::InvalidDeclaration(format!(
                "experiment '{experiment}' declaration is missing a variant id"
            ))
        })?;
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(SplitlaneError::InvalidDeclaration(format!(
                    "variant '{variant}' of '{experiment}' has invalid weight {weight}"
                )));
            }
        }
        Ok((experiment, variant))
    }

    fn resolved_copy(&self) -> String {
        non_blank(self.copy.as_deref())
            .or_else(|| non_blank(self.content.as_deref()))
            .unwrap_or_default()
            .to_string()
    }

    fn to_variant(&self) -> Variant {
        let mut variant = Variant::new(self.resolved_copy());
        variant.style = non_blank(self.style.as_deref()).map(str::to_string);
        if let Some(weight) = self.weight {
            variant.weight = weight;
        }
        variant
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A declaration that was rejected during discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDeclaration {
    /// Position in the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub experiments_created: Vec<String>,
    pub variants_created: usize,
    pub skipped: Vec<SkippedDeclaration>,
}

impl DiscoveryReport {
    pub fn changed(&self) -> bool {
        !self.experiments_created.is_empty() || self.variants_created > 0
    }
}

/// Register every valid declaration into `catalog`. Malformed declarations
/// are skipped and reported; they never stop the rest of the batch.
pub fn discover(
    catalog: &mut Catalog,
    declarations: &[Declaration],
    default_selection: SelectionMode,
    now: DateTime<Utc>,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    for (index, declaration) in declarations.iter().enumerate() {
        register(catalog, index, declaration, default_selection, now, &mut report);
    }
    report
}

/// Like [`discover`], but over raw JSON entries. An entry that does not even
/// deserialize into a [`Declaration`] is skipped at its own index.
pub fn discover_values(
    catalog: &mut Catalog,
    entries: &[serde_json::Value],
    default_selection: SelectionMode,
    now: DateTime<Utc>,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Declaration>(entry.clone()) {
            Ok(declaration) => {
                register(catalog, index, &declaration, default_selection, now, &mut report)
            }
            Err(e) => skip(&mut report, index, format!("Malformed declaration: {e}")),
        }
    }
    report
}

fn register(
    catalog: &mut Catalog,
    index: usize,
    declaration: &Declaration,
    default_selection: SelectionMode,
    now: DateTime<Utc>,
    report: &mut DiscoveryReport,
) {
    let (experiment_id, variant_id) = match declaration.validate() {
        Ok(ids) => ids,
        Err(e) => return skip(report, index, e.to_string()),
    };

    let experiment = catalog
        .entry(experiment_id.to_string())
        .or_insert_with(|| {
            report.experiments_created.push(experiment_id.to_string());
            Experiment::new(now, default_selection)
        });

    if experiment.has_variant(variant_id) {
        return;
    }
    if declaration.weight.is_some() {
        experiment.selection = SelectionMode::Weighted;
    }
    experiment
        .variants
        .insert(variant_id.to_string(), declaration.to_variant());
    report.variants_created += 1;
}

fn skip(report: &mut DiscoveryReport, index: usize, reason: String) {
    metrics::counter!("registry.skipped_declarations").increment(1);
    warn!(index = index, reason = %reason, "Skipping malformed declaration");
    report.skipped.push(SkippedDeclaration { index, reason });
}

impl ExperimentEngine {
    /// Ingest declarations from the content layer into the live catalog and
    /// flush it when anything new was registered.
    pub fn discover(&mut self, declarations: &[Declaration]) -> DiscoveryReport {
        let report = discover(
            &mut self.state.experiments,
            declarations,
            self.config.assignment.selection,
            Utc::now(),
        );
        self.finish_discovery(declarations.len(), &report);
        report
    }

    /// Ingest a JSON array of declarations. Only a document that is not an
    /// array is an error; bad entries inside it are skipped individually.
    pub fn discover_json(&mut self, json: &str) -> SplitlaneResult<DiscoveryReport> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let report = discover_values(
            &mut self.state.experiments,
            &entries,
            self.config.assignment.selection,
            Utc::now(),
        );
        self.finish_discovery(entries.len(), &report);
        Ok(report)
    }

    fn finish_discovery(&mut self, declarations: usize, report: &DiscoveryReport) {
        if report.changed() {
            self.flush_catalog();
        }

        info!(
            declarations = declarations,
            experiments_created = report.experiments_created.len(),
            variants_created = report.variants_created,
            skipped = report.skipped.len(),
            "Experiment discovery complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cta_declarations() -> Vec<Declaration> {
        vec![
            Declaration::new("cta-test", "A").with_copy("Start Free"),
            Declaration::new("cta-test", "B").with_copy("Try Now"),
        ]
    }

    #[test]
    fn test_discover_creates_experiment_and_variants() {
        let mut catalog = Catalog::new();
        let report = discover(
            &mut catalog,
            &cta_declarations(),
            SelectionMode::Uniform,
            Utc::now(),
        );

        assert_eq!(report.experiments_created, vec!["cta-test".to_string()]);
        assert_eq!(report.variants_created, 2);
        assert!(report.skipped.is_empty());

        let exp = &catalog["cta-test"];
        assert_eq!(exp.variants.len(), 2);
        assert_eq!(exp.variant("A").unwrap().copy, "Start Free");
        assert_eq!(exp.variant("B").unwrap().impressions, 0);
        assert_eq!(exp.selection, SelectionMode::Uniform);
    }

    #[test]
    fn test_rediscovery_keeps_counters_and_copy() {
        let mut catalog = Catalog::new();
        discover(
            &mut catalog,
            &cta_declarations(),
            SelectionMode::Uniform,
            Utc::now(),
        );
        let start = catalog["cta-test"].start_date;
        catalog
            .get_mut("cta-test")
            .unwrap()
            .variants
            .get_mut("A")
            .unwrap()
            .clicks = 7;

        let changed = vec![Declaration::new("cta-test", "A").with_copy("Different")];
        let report = discover(&mut catalog, &changed, SelectionMode::Uniform, Utc::now());

        assert!(!report.changed());
        let a = catalog["cta-test"].variant("A").unwrap();
        assert_eq!(a.clicks, 7);
        assert_eq!(a.copy, "Start Free");
        assert_eq!(catalog["cta-test"].start_date, start);
    }

    #[test]
    fn test_malformed_declarations_are_skipped() {
        let mut catalog = Catalog::new();
        let declarations = vec![
            Declaration::new("cta-test", "A").with_copy("Start Free"),
            Declaration {
                experiment: Some("cta-test".into()),
                variant: None,
                copy: Some("Orphan".into()),
                ..Default::default()
            },
            Declaration {
                experiment: Some("   ".into()),
                variant: Some("C".into()),
                ..Default::default()
            },
            Declaration::new("cta-test", "B").with_copy("Try Now"),
        ];

        let report = discover(&mut catalog, &declarations, SelectionMode::Uniform, Utc::now());

        assert_eq!(report.variants_created, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].index, 1);
        assert!(report.skipped[0].reason.contains("variant id"));
        assert_eq!(report.skipped[1].index, 2);
        assert!(catalog["cta-test"].has_variant("B"));
    }

    #[test]
    fn test_copy_falls_back_to_content() {
        let mut catalog = Catalog::new();
        let declarations = vec![
            Declaration::new("hero", "short").with_content("  Ship faster  "),
            Declaration::new("hero", "long")
                .with_copy("")
                .with_content("Ship faster with fewer meetings"),
            Declaration::new("hero", "bare"),
        ];
        discover(&mut catalog, &declarations, SelectionMode::Uniform, Utc::now());

        let hero = &catalog["hero"];
        assert_eq!(hero.variant("short").unwrap().copy, "Ship faster");
        assert_eq!(
            hero.variant("long").unwrap().copy,
            "Ship faster with fewer meetings"
        );
        assert_eq!(hero.variant("bare").unwrap().copy, "");
    }

    #[test]
    fn test_weight_switches_experiment_to_weighted() {
        let mut catalog = Catalog::new();
        let declarations = vec![
            Declaration::new("layout", "grid").with_weight(3.0).with_style("layout-grid"),
            Declaration::new("layout", "list"),
        ];
        discover(&mut catalog, &declarations, SelectionMode::Uniform, Utc::now());

        let layout = &catalog["layout"];
        assert_eq!(layout.selection, SelectionMode::Weighted);
        assert_eq!(layout.variant("grid").unwrap().weight, 3.0);
        assert_eq!(
            layout.variant("grid").unwrap().style.as_deref(),
            Some("layout-grid")
        );
        assert_eq!(layout.variant("list").unwrap().weight, 1.0);
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        for weight in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let declaration = Declaration::new("layout", "grid").with_weight(weight);
            assert!(matches!(
                declaration.validate(),
                Err(SplitlaneError::InvalidDeclaration(_))
            ));
        }
    }

    #[test]
    fn test_declaration_parses_from_json() {
        let json = r#"[
            {"experiment": "cta-test", "variant": "A", "copy": "Start Free"},
            {"experiment": "cta-test", "variant": "B", "style": "btn-green", "weight": 2}
        ]"#;
        let declarations: Vec<Declaration> = serde_json::from_str(json).unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[1].weight, Some(2.0));
        assert_eq!(declarations[1].style.as_deref(), Some("btn-green"));
    }

    #[test]
    fn test_wrongly_typed_entry_does_not_sink_the_batch() {
        let entries: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {"experiment": "cta-test", "variant": "A", "copy": "Start Free"},
                {"experiment": "cta-test", "variant": 7},
                {"experiment": "cta-test", "variant": "B", "copy": "Try Now"}
            ]"#,
        )
        .unwrap();
        let mut catalog = Catalog::new();
        let report = discover_values(&mut catalog, &entries, SelectionMode::Uniform, Utc::now());

        assert_eq!(report.variants_created, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert!(report.skipped[0].reason.contains("invalid type"));
        assert!(catalog["cta-test"].has_variant("A"));
        assert!(catalog["cta-test"].has_variant("B"));
    }

    #[test]
    fn test_engine_discover_json() {
        let mut engine = ExperimentEngine::new(
            splitlane_core::EngineConfig::default(),
            splitlane_store::PersistenceStore::in_memory("registry"),
        );
        let report = engine
            .discover_json(
                r#"[
                    {"experiment": "cta-test", "variant": "A"},
                    "not a declaration",
                    {"experiment": "cta-test", "variant": "B", "weight": 2}
                ]"#,
            )
            .unwrap();

        assert_eq!(report.experiments_created, vec!["cta-test".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(engine.experiment("cta-test").unwrap().variants.len(), 2);

        engine.reload();
        assert!(engine.experiment("cta-test").unwrap().has_variant("B"));

        assert!(matches!(
            engine.discover_json(r#"{"experiment": "cta-test"}"#),
            Err(SplitlaneError::Serialization(_))
        ));
    }
}
