//! End-to-end lifecycle scenarios over a real engine and store.

#![allow(clippy::unwrap_used)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use splitlane_core::config::{StorageBackendKind, StorageConfig};
use splitlane_core::EngineConfig;
use splitlane_experiments::{Confidence, Declaration, ExperimentEngine, Visitor};
use splitlane_store::PersistenceStore;
use tempfile::TempDir;

fn cta_declarations() -> Vec<Declaration> {
    vec![
        Declaration::new("cta-test", "A").with_copy("Start Free"),
        Declaration::new("cta-test", "B").with_copy("Try Now"),
    ]
}

fn new_engine() -> ExperimentEngine {
    let mut engine =
        ExperimentEngine::new(EngineConfig::default(), PersistenceStore::in_memory("scenario"))
            .with_rng(StdRng::seed_from_u64(2024));
    engine.discover(&cta_declarations());
    engine
}

fn record(
    engine: &mut ExperimentEngine,
    variant: &str,
    impressions: u32,
    clicks: u32,
    conversions: u32,
) {
    for _ in 0..impressions {
        engine.record_impression("cta-test", variant);
    }
    for _ in 0..clicks {
        engine.record_click("cta-test", variant);
    }
    for _ in 0..conversions {
        engine.record_conversion_for("cta-test", variant);
    }
}

#[test]
fn cta_test_declares_b_the_winner() {
    let mut engine = new_engine();
    record(&mut engine, "A", 40, 12, 6);
    record(&mut engine, "B", 40, 20, 15);

    let result = engine.evaluate("cta-test").unwrap();
    assert_eq!(result.variants[0].variant_id, "B");
    assert_eq!(result.variants[1].variant_id, "A");

    let winner = result.winner.unwrap();
    assert_eq!(winner.variant_id, "B");
    assert_eq!(winner.copy, "Try Now");
    assert!((winner.improvement.unwrap() - 0.333).abs() < 0.001);
    assert_eq!(winner.confidence, Confidence::Medium);
}

#[test]
fn cta_test_with_ten_clicks_needs_twenty_more() {
    let mut engine = new_engine();
    record(&mut engine, "A", 20, 4, 1);
    record(&mut engine, "B", 20, 6, 2);

    let result = engine.get_results("cta-test").unwrap();
    assert!(result.winner.is_none());
    assert_eq!(result.clicks_needed, 20);
    assert!(result.message.contains("20 more clicks"));
}

#[test]
fn forced_variant_wins_over_resolution() {
    let mut engine = new_engine();
    let visitor = Visitor::new("qa-visitor");
    engine.resolve("cta-test", &visitor);
    engine.force_variant("cta-test", "B", &visitor).unwrap();
    assert_eq!(engine.resolve("cta-test", &visitor).as_deref(), Some("B"));
}

#[test]
fn malformed_declaration_does_not_block_the_batch() {
    let mut engine =
        ExperimentEngine::new(EngineConfig::default(), PersistenceStore::in_memory("scenario"));
    let mut declarations = cta_declarations();
    declarations.insert(
        1,
        Declaration {
            experiment: Some("cta-test".into()),
            copy: Some("Orphan".into()),
            ..Default::default()
        },
    );

    let report = engine.discover(&declarations);
    assert_eq!(report.skipped.len(), 1);
    let exp = engine.experiment("cta-test").unwrap();
    assert!(exp.has_variant("A"));
    assert!(exp.has_variant("B"));
}

#[test]
fn visitor_keeps_variant_across_page_loads() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        storage: StorageConfig {
            backend: StorageBackendKind::File,
            path: tmp.path().to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    };
    let visitor = Visitor::new("returning-visitor");

    let first = {
        let mut engine = ExperimentEngine::open(config.clone()).unwrap();
        engine.discover(&cta_declarations());
        let variant = engine.resolve("cta-test", &visitor).unwrap();
        engine.record_impression("cta-test", &variant);
        variant
    };

    for _ in 0..5 {
        let mut engine = ExperimentEngine::open(config.clone()).unwrap();
        engine.discover(&cta_declarations());
        let variant = engine.resolve("cta-test", &visitor).unwrap();
        assert_eq!(variant, first);
        engine.record_impression("cta-test", &variant);
    }

    let engine = ExperimentEngine::open(config).unwrap();
    let exp = engine.experiment("cta-test").unwrap();
    assert_eq!(exp.variant(&first).unwrap().impressions, 6);
    assert_eq!(exp.totals().impressions, 6);
}

#[test]
fn full_funnel_drives_a_winner() {
    let mut engine = new_engine();
    for i in 0..200 {
        let visitor = Visitor::new(format!("visitor-{i}"));
        let variant = engine.resolve("cta-test", &visitor).unwrap();
        engine.record_impression("cta-test", &variant);
        if i % 2 == 0 {
            engine.record_click("cta-test", &variant);
            if variant == "B" || i % 4 == 0 {
                engine.record_conversion("cta-test", &visitor);
            }
        }
    }

    let result = engine.evaluate("cta-test").unwrap();
    assert_eq!(result.totals.impressions, 200);
    assert_eq!(result.totals.clicks, 100);
    assert_eq!(result.winner.unwrap().confidence, Confidence::High);
}
