//! Text renderings of evaluation results for developers and operators.

use splitlane_experiments::EvaluationResult;
use std::io::{self, Write};

// ─── Table ──────────────────────────────────────────────────────────────────

const COLUMNS: [&str; 7] = [
    "variant",
    "copy",
    "impressions",
    "clicks",
    "conversions",
    "ctr",
    "cvr",
];

const MAX_COPY_WIDTH: usize = 28;

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn rows(result: &EvaluationResult) -> Vec<[String; 7]> {
    result
        .variants
        .iter()
        .map(|v| {
            [
                v.variant_id.clone(),
                truncate(&v.copy, MAX_COPY_WIDTH),
                v.impressions.to_string(),
                v.clicks.to_string(),
                v.conversions.to_string(),
                percent(v.ctr),
                percent(v.cvr),
            ]
        })
        .collect()
}

/// Verdict printed under the table: the winner or the remaining sample.
pub fn verdict(result: &EvaluationResult) -> String {
    match &result.winner {
        Some(winner) => {
            let lift = winner
                .improvement
                .map(|i| format!(", +{} vs runner-up", percent(i)))
                .unwrap_or_default();
            format!(
                "Winner: {} (CVR {}{}), confidence {} (click-count heuristic)",
                winner.variant_id,
                percent(winner.cvr),
                lift,
                winner.confidence
            )
        }
        None => result.message.clone(),
    }
}

/// Render one experiment as an aligned text table followed by its verdict.
pub fn render_table(result: &EvaluationResult) -> String {
    let rows = rows(result);
    let mut widths = COLUMNS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (cell, width))| {
                // text columns left-aligned, numbers right-aligned
                if i < 2 {
                    format!("{cell:<width$}")
                } else {
                    format!("{cell:>width$}")
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut out = format!(
        "Experiment: {} (started {})\n",
        result.experiment_id,
        result.start_date.format("%Y-%m-%d %H:%M UTC")
    );
    out.push_str(&format_row(&header));
    out.push('\n');
    out.push_str(&format_row(&rule));
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out.push_str(&format!(
        "Totals: {} impressions, {} clicks, {} conversions\n",
        result.totals.impressions, result.totals.clicks, result.totals.conversions
    ));
    out.push_str(&verdict(result));
    out.push('\n');
    out
}

/// Write a table per result, separated by blank lines.
pub fn display_results<W: Write>(results: &[EvaluationResult], out: &mut W) -> io::Result<()> {
    if results.is_empty() {
        writeln!(out, "No experiments discovered yet.")?;
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        write!(out, "{}", render_table(result))?;
    }
    Ok(())
}

/// One line per experiment, suitable for log output.
pub fn summary_line(result: &EvaluationResult) -> String {
    let status = match &result.winner {
        Some(winner) => format!("winner={} confidence={}", winner.variant_id, winner.confidence),
        None => format!("clicks_needed={}", result.clicks_needed),
    };
    format!(
        "{}: variants={} impressions={} clicks={} conversions={} {}",
        result.experiment_id,
        result.variants.len(),
        result.totals.impressions,
        result.totals.clicks,
        result.totals.conversions,
        status
    )
}

// ─── CSV ────────────────────────────────────────────────────────────────────

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Flat CSV with one row per (experiment, variant), rates as fractions.
pub fn to_csv(results: &[EvaluationResult]) -> String {
    let mut csv = String::from("experiment,rank,variant,copy,impressions,clicks,conversions,ctr,cvr\n");
    for result in results {
        for v in &result.variants {
            let cells = [
                csv_cell(&result.experiment_id),
                v.rank.to_string(),
                csv_cell(&v.variant_id),
                csv_cell(&v.copy),
                v.impressions.to_string(),
                v.clicks.to_string(),
                v.conversions.to_string(),
                format!("{:.4}", v.ctr),
                format!("{:.4}", v.cvr),
            ];
            csv.push_str(&cells.join(","));
            csv.push('\n');
        }
    }
    csv
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use splitlane_core::config::StatisticsConfig;
    use splitlane_core::types::SelectionMode;
    use splitlane_core::{Experiment, Variant};
    use splitlane_experiments::stats::evaluate;

    fn variant(copy: &str, impressions: u64, clicks: u64, conversions: u64) -> Variant {
        let mut v = Variant::new(copy);
        v.impressions = impressions;
        v.clicks = clicks;
        v.conversions = conversions;
        v
    }

    fn result(a: Variant, b: Variant) -> EvaluationResult {
        let mut exp = Experiment::new(Utc::now(), SelectionMode::Uniform);
        exp.variants.insert("A".into(), a);
        exp.variants.insert("B".into(), b);
        evaluate("cta-test", &exp, &StatisticsConfig::default())
    }

    fn winning() -> EvaluationResult {
        result(variant("Start Free", 40, 12, 6), variant("Try Now", 40, 20, 15))
    }

    #[test]
    fn test_table_lists_ranked_variants() {
        let table = render_table(&winning());
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[0].starts_with("Experiment: cta-test"));
        assert!(lines[1].starts_with("variant"));
        assert!(lines[3].starts_with('B'));
        assert!(lines[3].contains("Try Now"));
        assert!(lines[3].contains("75.0%"));
        assert!(lines[4].starts_with('A'));
        assert!(lines[4].contains("30.0%"));
        assert!(table.contains("Winner: B"));
        assert!(table.contains("+33.3% vs runner-up"));
        assert!(table.contains("confidence Medium"));
    }

    #[test]
    fn test_table_reports_clicks_needed() {
        let table = render_table(&result(
            variant("Start Free", 20, 4, 1),
            variant("Try Now", 20, 6, 2),
        ));
        assert!(table.ends_with("Need 20 more clicks to determine a winner\n"));
    }

    #[test]
    fn test_long_copy_is_truncated() {
        let long = "Start your free thirty day trial with no credit card";
        let table = render_table(&result(variant(long, 1, 0, 0), variant("Try Now", 1, 0, 0)));
        assert!(!table.contains(long));
        assert!(table.contains('…'));
    }

    #[test]
    fn test_display_results_writes_every_table() {
        let mut out = Vec::new();
        display_results(&[winning(), winning()], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Experiment: cta-test").count(), 2);

        let mut empty = Vec::new();
        display_results(&[], &mut empty).unwrap();
        assert_eq!(String::from_utf8(empty).unwrap(), "No experiments discovered yet.\n");
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(
            summary_line(&winning()),
            "cta-test: variants=2 impressions=80 clicks=32 conversions=21 winner=B confidence=Medium"
        );
    }

    #[test]
    fn test_csv_quotes_copy_with_commas() {
        let csv = to_csv(&[result(
            variant("Fast, free", 10, 5, 1),
            variant("Try \"Now\"", 10, 5, 2),
        )]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("experiment,rank,variant"));
        assert!(lines[1].contains("\"Try \"\"Now\"\"\""));
        assert!(lines[2].contains("\"Fast, free\""));
    }

    #[test]
    fn test_csv_quotes_line_breaks() {
        assert_eq!(csv_cell("Start\r\nFree"), "\"Start\r\nFree\"");
        assert_eq!(csv_cell("Start\rFree"), "\"Start\rFree\"");
        assert_eq!(csv_cell("Start Free"), "Start Free");
    }
}
